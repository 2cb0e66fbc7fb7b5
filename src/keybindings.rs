/// Centralized keybinding definitions for connwatch
/// This keeps the help overlay, status bar and key handlers in sync

#[derive(Debug, Clone)]
pub struct KeyBinding {
    pub key: &'static str,
    pub description: &'static str,
    pub category: KeyCategory,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KeyCategory {
    Navigation,
    View,
    System,
}

impl KeyCategory {
    pub fn title(&self) -> &'static str {
        match self {
            KeyCategory::Navigation => "Navigation",
            KeyCategory::View => "View",
            KeyCategory::System => "System",
        }
    }
}

/// Get all keybindings
pub fn get_all_keybindings() -> Vec<KeyBinding> {
    vec![
        // Navigation
        KeyBinding {
            key: "↑/k",
            description: "Move selection up",
            category: KeyCategory::Navigation,
        },
        KeyBinding {
            key: "↓/j",
            description: "Move selection down",
            category: KeyCategory::Navigation,
        },
        KeyBinding {
            key: "g/G",
            description: "Jump to first/last connection",
            category: KeyCategory::Navigation,
        },
        KeyBinding {
            key: "Enter",
            description: "Show selected connection in the status bar",
            category: KeyCategory::Navigation,
        },
        // View
        KeyBinding {
            key: "/",
            description: "Edit connection filter (regex, Enter applies)",
            category: KeyCategory::View,
        },
        KeyBinding {
            key: "F",
            description: "Toggle connection filter on/off",
            category: KeyCategory::View,
        },
        KeyBinding {
            key: "z",
            description: "Show/hide connections without a known process",
            category: KeyCategory::View,
        },
        // System
        KeyBinding {
            key: "h/?",
            description: "Toggle this help",
            category: KeyCategory::System,
        },
        KeyBinding {
            key: "q/Esc",
            description: "Quit (or close help/filter prompt)",
            category: KeyCategory::System,
        },
        KeyBinding {
            key: "Ctrl+C",
            description: "Force quit (always exits)",
            category: KeyCategory::System,
        },
    ]
}

/// Get keybindings for the status bar (most common ones)
pub fn get_status_bar_keybindings() -> Vec<(&'static str, &'static str)> {
    vec![
        ("↑↓", "Navigate"),
        ("/", "Filter"),
        ("F", "Filter on/off"),
        ("z", "PID 0"),
        ("h", "Help"),
        ("q/Ctrl+C", "Quit"),
    ]
}
