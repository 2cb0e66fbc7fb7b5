use crate::connection::{ConnectionKey, DisplayedConnection, format_bytes};
use crate::engine::filter::{self, FilterSettings};
use crate::engine::{DisplaySnapshot, RuntimeSettings};
use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Clear, Paragraph, Row, Table, TableState},
};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

pub struct AppState {
    pub snapshot: DisplaySnapshot,
    pub visible: Vec<DisplayedConnection>, // Rows currently drawn, in display order
    pub selected_index: Option<usize>,
    pub table_state: TableState,
    selected_key: Option<ConnectionKey>, // Keeps the selection on the same row across updates
    pub settings: RuntimeSettings,
    pub filter_input: Option<String>, // Some while the filter prompt is open
    pub show_help: bool,
    pub help_scroll_offset: usize,
    pub status_message: String,
}

impl AppState {
    pub fn new(settings: RuntimeSettings) -> Self {
        Self {
            snapshot: DisplaySnapshot::default(),
            visible: Vec::new(),
            selected_index: None,
            table_state: TableState::default(),
            selected_key: None,
            settings,
            filter_input: None,
            show_help: false,
            help_scroll_offset: 0,
            status_message: "Press h for help".to_string(),
        }
    }

    /// Take a fresh engine snapshot, keeping the selected connection if it is still shown
    pub fn update_snapshot(&mut self, snapshot: DisplaySnapshot) {
        self.visible = snapshot
            .connections
            .iter()
            .filter(|c| c.is_visible)
            .cloned()
            .collect();
        self.snapshot = snapshot;

        let index = if self.visible.is_empty() {
            None
        } else {
            let by_key = self
                .selected_key
                .and_then(|key| self.visible.iter().position(|c| c.key == key));
            match (by_key, self.selected_index) {
                (Some(idx), _) => Some(idx),
                (None, Some(idx)) => Some(idx.min(self.visible.len() - 1)),
                (None, None) => None,
            }
        };
        self.select(index);
    }

    fn select(&mut self, index: Option<usize>) {
        self.selected_index = index;
        self.selected_key = index.and_then(|idx| self.visible.get(idx)).map(|c| c.key);
        self.table_state.select(index);
    }

    pub fn select_next(&mut self) {
        if self.visible.is_empty() {
            return;
        }

        let new_index = match self.selected_index {
            None => 0, // If nothing selected, select first item
            Some(idx) => (idx + 1) % self.visible.len(),
        };
        self.select(Some(new_index));
    }

    pub fn select_previous(&mut self) {
        if self.visible.is_empty() {
            return;
        }

        let new_index = match self.selected_index {
            None => 0,
            Some(0) => self.visible.len() - 1,
            Some(idx) => idx - 1,
        };
        self.select(Some(new_index));
    }

    pub fn select_first(&mut self) {
        if !self.visible.is_empty() {
            self.select(Some(0));
        }
    }

    pub fn select_last(&mut self) {
        if !self.visible.is_empty() {
            self.select(Some(self.visible.len() - 1));
        }
    }

    pub fn get_selected_connection(&self) -> Option<&DisplayedConnection> {
        self.selected_index.and_then(|idx| self.visible.get(idx))
    }

    /// Open the filter prompt, pre-filled with the current pattern
    pub fn start_filter_edit(&mut self) {
        self.filter_input = Some(self.settings.filter.pattern.clone());
    }

    pub fn cancel_filter_edit(&mut self) {
        self.filter_input = None;
    }

    pub fn handle_filter_char(&mut self, c: char) {
        if let Some(input) = &mut self.filter_input {
            input.push(c);
        }
    }

    pub fn handle_filter_backspace(&mut self) {
        if let Some(input) = &mut self.filter_input {
            input.pop();
        }
    }

    /// Close the prompt and return the filter to apply. An empty pattern
    /// switches filtering off.
    pub fn commit_filter_edit(&mut self) -> Option<FilterSettings> {
        let pattern = self.filter_input.take()?;
        let settings = FilterSettings {
            enabled: !pattern.is_empty(),
            pattern,
        };

        self.status_message = if !settings.enabled {
            "Filter cleared".to_string()
        } else if let Err(e) = filter::compile(&settings.pattern) {
            log::debug!("Filter pattern rejected: {}", e);
            format!("Invalid filter '{}', keeping previous view", settings.pattern)
        } else {
            format!("Filter set: {}", settings.pattern)
        };

        self.settings.filter = settings.clone();
        Some(settings)
    }

    pub fn reset_help_scroll(&mut self) {
        self.help_scroll_offset = 0;
    }

    pub fn scroll_help_up(&mut self) {
        self.help_scroll_offset = self.help_scroll_offset.saturating_sub(1);
    }

    pub fn scroll_help_down(&mut self) {
        self.help_scroll_offset = self.help_scroll_offset.saturating_add(1);
    }

    pub fn clamp_scroll(scroll_offset: usize, content_lines: usize, visible_height: u16) -> usize {
        // Account for borders (top + bottom = 2) and padding
        let usable_height = visible_height.saturating_sub(3) as usize;
        let max_scroll = content_lines.saturating_sub(usable_height);
        scroll_offset.min(max_scroll)
    }
}

/// Cut `text` to at most `max_width` terminal columns, marking the cut with '…'
fn truncate(text: &str, max_width: usize) -> String {
    if text.width() <= max_width {
        return text.to_string();
    }
    if max_width == 0 {
        return String::new();
    }

    let mut out = String::new();
    let mut width = 0;
    for c in text.chars() {
        let w = c.width().unwrap_or(0);
        if width + w + 1 > max_width {
            break;
        }
        width += w;
        out.push(c);
    }
    out.push('…');
    out
}

fn row_style(conn: &DisplayedConnection) -> Style {
    let color = if conn.is_closed {
        Color::Red
    } else if conn.is_new {
        Color::Green
    } else if conn.has_changed {
        Color::Yellow
    } else {
        Color::White
    };

    let style = Style::default().fg(color);
    if conn.has_data {
        style.add_modifier(Modifier::BOLD)
    } else {
        style
    }
}

pub fn draw_ui(f: &mut Frame, app: &mut AppState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header
            Constraint::Min(5),    // Connection table
            Constraint::Length(4), // Status bar
        ])
        .split(f.area());

    draw_header(f, chunks[0], app);
    draw_connection_table(f, chunks[1], app);
    draw_status_bar(f, chunks[2], app);

    if app.filter_input.is_some() {
        draw_filter_prompt(f, f.area(), app);
    }

    if app.show_help {
        draw_help_overlay(f, f.area(), app);
    }
}

fn draw_header(f: &mut Frame, area: Rect, app: &AppState) {
    let snapshot = &app.snapshot;
    let updated = snapshot
        .updated_at
        .map(|t| t.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "--:--:--".to_string());

    let header = Paragraph::new(Line::from(vec![
        Span::styled(
            "connwatch",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(format!(
            "  TCP: {}  UDP: {}  Dropped: {}  Mem: {:.1} MB  Updated: {}",
            snapshot.tcp_connections,
            snapshot.udp_connections,
            snapshot.dropped_packets,
            snapshot.memory_mb,
            updated
        )),
    ]))
    .block(Block::default().borders(Borders::ALL));

    f.render_widget(header, area);
}

fn draw_connection_table(f: &mut Frame, area: Rect, app: &mut AppState) {
    let rows: Vec<Row> = app
        .visible
        .iter()
        .map(|conn| {
            let pid = if conn.pid == 0 {
                "-".to_string()
            } else {
                conn.pid.to_string()
            };
            Row::new(vec![
                Cell::from(conn.connection_type.as_str()),
                Cell::from(conn.local.to_string()),
                Cell::from(truncate(&conn.local_hostname, 24)),
                Cell::from(conn.remote.to_string()),
                Cell::from(truncate(&conn.remote_hostname, 32)),
                Cell::from(conn.state.as_str()),
                Cell::from(pid),
                Cell::from(truncate(&conn.process_name, 20)),
                Cell::from(format!(
                    "{}/{}",
                    conn.packets_sent,
                    format_bytes(conn.bytes_sent)
                )),
                Cell::from(format!(
                    "{}/{}",
                    conn.packets_received,
                    format_bytes(conn.bytes_received)
                )),
            ])
            .style(row_style(conn))
        })
        .collect();

    let header = Row::new(vec![
        "Type", "Local", "Local Host", "Remote", "Remote Host", "State", "PID", "Process",
        "Sent", "Received",
    ])
    .style(Style::default().add_modifier(Modifier::BOLD));

    let widths = [
        Constraint::Length(6),
        Constraint::Length(22),
        Constraint::Length(24),
        Constraint::Length(22),
        Constraint::Min(16),
        Constraint::Length(12),
        Constraint::Length(8),
        Constraint::Length(20),
        Constraint::Length(14),
        Constraint::Length(14),
    ];

    let title = format!(
        "Connections ({} shown / {} total)",
        app.visible.len(),
        app.snapshot.connections.len()
    );

    let table = Table::new(rows, widths)
        .header(header)
        .block(Block::default().borders(Borders::ALL).title(title))
        .highlight_style(Style::default().bg(Color::DarkGray))
        .highlight_symbol("▶ ");

    f.render_stateful_widget(table, area, &mut app.table_state);
}

fn draw_status_bar(f: &mut Frame, area: Rect, app: &AppState) {
    // Auto-generate status bar from centralized keybindings
    let mut spans = vec![];

    for (i, (key, description)) in crate::keybindings::get_status_bar_keybindings()
        .iter()
        .enumerate()
    {
        if i > 0 {
            spans.push(Span::raw(" "));
        }
        spans.push(Span::styled(
            format!("[{}]", key),
            Style::default().fg(Color::Yellow),
        ));
        spans.push(Span::raw(format!(" {} ", description)));
    }

    let filter = &app.settings.filter;
    let filter_text = if filter.is_active() {
        format!("FILTER: {}", filter.pattern)
    } else if filter.pattern.is_empty() {
        "FILTER: off".to_string()
    } else {
        format!("FILTER: off ({})", filter.pattern)
    };
    let filter_color = if filter.is_active() {
        Color::Cyan
    } else {
        Color::Gray
    };

    let pid_zero_text = if app.settings.view_pid_zero {
        "PID 0: shown"
    } else {
        "PID 0: hidden"
    };

    let info = Line::from(vec![
        Span::styled(
            filter_text,
            Style::default()
                .fg(filter_color)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(" | "),
        Span::styled(pid_zero_text, Style::default().fg(Color::Cyan)),
        Span::raw(" | "),
        Span::styled(&app.status_message, Style::default().fg(Color::Gray)),
    ]);

    let status = Paragraph::new(vec![Line::from(spans), info])
        .block(Block::default().borders(Borders::ALL));

    f.render_widget(status, area);
}

fn draw_filter_prompt(f: &mut Frame, area: Rect, app: &AppState) {
    let input = app.filter_input.as_deref().unwrap_or_default();

    let prompt_area = centered_rect(60, 20, area);
    let text = vec![
        Line::from(""),
        Line::from(vec![
            Span::styled("Regex: ", Style::default().fg(Color::Yellow)),
            Span::raw(input),
            Span::styled("█", Style::default().fg(Color::Gray)),
        ]),
        Line::from(""),
        Line::from("Enter to apply, empty to clear, Esc to cancel"),
    ];

    let prompt = Paragraph::new(text)
        .style(Style::default().bg(Color::Black).fg(Color::White))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title("Connection Filter")
                .style(Style::default().fg(Color::Cyan)),
        );

    f.render_widget(Clear, prompt_area);
    f.render_widget(prompt, prompt_area);
}

fn draw_help_overlay(f: &mut Frame, area: Rect, app: &mut AppState) {
    // Auto-generate help text from centralized keybindings
    let mut help_text = vec![
        Line::from(""),
        Line::from(Span::styled(
            "connwatch - Keyboard Shortcuts",
            Style::default().add_modifier(Modifier::BOLD),
        )),
    ];

    let mut category = None;
    for binding in crate::keybindings::get_all_keybindings() {
        if category != Some(binding.category) {
            category = Some(binding.category);
            help_text.push(Line::from(""));
            help_text.push(Line::from(Span::styled(
                binding.category.title(),
                Style::default().fg(Color::Yellow),
            )));
        }
        help_text.push(Line::from(format!(
            "  {:12} - {}",
            binding.key, binding.description
        )));
    }

    help_text.push(Line::from(""));
    help_text.push(Line::from(Span::styled(
        "Rows: green = new, yellow = state changed, red = closed, bold = traffic",
        Style::default().fg(Color::Gray),
    )));
    help_text.push(Line::from(""));
    help_text.push(Line::from("Use ↑↓ to scroll, any other key to close"));

    let help_area = centered_rect(60, 60, area);

    // Clamp scroll offset to content bounds
    let content_lines = help_text.len();
    let clamped_scroll =
        AppState::clamp_scroll(app.help_scroll_offset, content_lines, help_area.height);
    app.help_scroll_offset = clamped_scroll;

    let help = Paragraph::new(help_text)
        .style(Style::default().bg(Color::Black).fg(Color::White))
        .scroll((clamped_scroll as u16, 0))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title("Help")
                .style(Style::default().fg(Color::Cyan)),
        );

    f.render_widget(Clear, help_area);
    f.render_widget(help, help_area);
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionState, LiveConnection, Protocol};

    fn displayed(port: u16, visible: bool) -> DisplayedConnection {
        let live = LiveConnection::new(
            Protocol::Tcp,
            format!("10.0.0.1:{}", port).parse().unwrap(),
            "1.1.1.1:443".parse().unwrap(),
            ConnectionState::Established,
            100,
            "curl".to_string(),
        );
        let mut conn = DisplayedConnection::from_live(&live);
        conn.is_visible = visible;
        conn
    }

    fn snapshot(connections: Vec<DisplayedConnection>) -> DisplaySnapshot {
        DisplaySnapshot {
            connections,
            ..Default::default()
        }
    }

    #[test]
    fn test_only_visible_rows_are_listed() {
        let mut app = AppState::new(RuntimeSettings::default());
        app.update_snapshot(snapshot(vec![
            displayed(1, true),
            displayed(2, false),
            displayed(3, true),
        ]));

        let ports: Vec<u16> = app.visible.iter().map(|c| c.local.port()).collect();
        assert_eq!(ports, vec![1, 3]);
    }

    #[test]
    fn test_selection_wraps_and_follows_key() {
        let mut app = AppState::new(RuntimeSettings::default());
        app.update_snapshot(snapshot(vec![displayed(1, true), displayed(3, true)]));

        app.select_previous();
        app.select_previous();
        assert_eq!(app.selected_index, Some(1));

        app.select_next();
        assert_eq!(app.selected_index, Some(0));
        app.select_next();
        assert_eq!(app.get_selected_connection().unwrap().local.port(), 3);

        // A new row sorted in front keeps the selection on the same connection
        app.update_snapshot(snapshot(vec![
            displayed(1, true),
            displayed(2, true),
            displayed(3, true),
        ]));
        assert_eq!(app.selected_index, Some(2));
        assert_eq!(app.table_state.selected(), Some(2));

        // Selected row gone: clamp to the list
        app.update_snapshot(snapshot(vec![displayed(1, true)]));
        assert_eq!(app.selected_index, Some(0));

        app.update_snapshot(snapshot(Vec::new()));
        assert_eq!(app.selected_index, None);
    }

    #[test]
    fn test_filter_edit() {
        let mut app = AppState::new(RuntimeSettings::default());

        app.start_filter_edit();
        for c in "sshd".chars() {
            app.handle_filter_char(c);
        }
        app.handle_filter_backspace();
        app.handle_filter_char('d');

        let settings = app.commit_filter_edit().unwrap();
        assert!(settings.enabled);
        assert_eq!(settings.pattern, "sshd");
        assert!(app.filter_input.is_none());
        assert_eq!(app.settings.filter, settings);

        app.start_filter_edit();
        assert_eq!(app.filter_input.as_deref(), Some("sshd"));
        app.cancel_filter_edit();
        assert!(app.commit_filter_edit().is_none());

        app.start_filter_edit();
        app.filter_input = Some(String::new());
        let cleared = app.commit_filter_edit().unwrap();
        assert!(!cleared.enabled);
    }

    #[test]
    fn test_invalid_filter_is_reported() {
        let mut app = AppState::new(RuntimeSettings::default());
        app.filter_input = Some("([".to_string());

        let settings = app.commit_filter_edit().unwrap();
        assert!(settings.enabled);
        assert!(app.status_message.starts_with("Invalid filter"));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("curl", 10), "curl");
        assert_eq!(truncate("very-long-process-name", 8), "very-lo…");
        assert_eq!(truncate("abc", 0), "");
        assert!(truncate("日本語のプロセス", 7).width() <= 7);
    }

    #[test]
    fn test_row_style() {
        let mut conn = displayed(1, true);
        assert_eq!(row_style(&conn).fg, Some(Color::White));

        conn.is_new = true;
        assert_eq!(row_style(&conn).fg, Some(Color::Green));

        conn.is_closed = true;
        conn.has_data = true;
        let style = row_style(&conn);
        assert_eq!(style.fg, Some(Color::Red));
        assert!(style.add_modifier.contains(Modifier::BOLD));
    }
}
