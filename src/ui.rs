use ratatui::Frame;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Cell, Clear, Paragraph, Row, Table, TableState, Wrap};

use crate::app::{App, InputMode};
use crate::nav::{Layer, StatusKind};
use crate::page::TablePage;

const BG: Color = Color::Rgb(9, 15, 25);
const PANEL: Color = Color::Rgb(16, 27, 44);
const ACCENT: Color = Color::Rgb(52, 211, 153);
const MUTED: Color = Color::Rgb(140, 156, 178);
const WARN: Color = Color::Rgb(251, 191, 36);
const ERROR: Color = Color::Rgb(248, 113, 113);
const PL_A: Color = Color::Rgb(17, 94, 89);
const PL_B: Color = Color::Rgb(30, 64, 175);
const SELECTED_ROW: Color = Color::Rgb(24, 36, 58);

const LOGO: &str = r"    _
   / \   __  _____
  / _ \  \ \/ / _ \
 / ___ \  >  <  __/
/_/   \_\/_/\_\___|";

const SHORTCUTS: &[(&str, &str)] = &[
    ("1-0", "switch page"),
    ("Enter", "open / describe"),
    ("b / Esc", "back"),
    ("m", "menu"),
    ("r", "refresh"),
    ("/", "search"),
    (":", "command (:ns, :<kind>, :api-resources, :q)"),
    ("y", "get yaml"),
    ("d", "describe"),
    ("l", "follow logs (G to resume)"),
    ("e", "edit"),
    ("s", "shell"),
    ("Ctrl-d", "delete"),
    ("q", "quit"),
];

pub fn render(frame: &mut Frame, app: &mut App) {
    let root = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(6),
            Constraint::Length(1),
        ])
        .split(frame.area());

    render_header(frame, root[0], app);
    render_body(frame, root[1], app);
    render_footer(frame, root[2], app);
}

fn render_header(frame: &mut Frame, area: Rect, app: &App) {
    let left = Line::from(vec![
        Span::styled(
            " axe ",
            Style::default()
                .fg(Color::Black)
                .bg(ACCENT)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled(
            format!(" ctx:{} ", app.context()),
            Style::default().fg(Color::White),
        ),
        Span::styled(
            format!(" ns:{} ", app.namespace_scope()),
            Style::default().fg(WARN),
        ),
    ]);
    let right = Line::from(Span::styled(
        format!("{} ", display_cluster_endpoint(app.cluster())),
        Style::default().fg(MUTED),
    ));

    let right_width = spans_width(&right.spans) as u16;
    if area.width < 42 || right_width >= area.width {
        frame.render_widget(Paragraph::new(left).style(Style::default().bg(BG)), area);
        return;
    }

    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Min(1), Constraint::Length(right_width)])
        .split(area);
    frame.render_widget(Paragraph::new(left).style(Style::default().bg(BG)), chunks[0]);
    frame.render_widget(
        Paragraph::new(right)
            .style(Style::default().bg(BG))
            .alignment(Alignment::Right),
        chunks[1],
    );
}

fn render_body(frame: &mut Frame, area: Rect, app: &mut App) {
    let (page, track) = app.visible();
    render_table(frame, area, &page);

    match &track.layer {
        Layer::Table => {}
        Layer::Menu => render_menu(frame, area, app),
        Layer::Detail { title, body } => {
            let scroll = render_detail(frame, area, title, body, app.detail_scroll());
            app.set_detail_scroll(scroll);
        }
        Layer::Logs { title } => {
            let state = if !app.log_stream_live() {
                "ended"
            } else if app.log_following() {
                "following"
            } else {
                "paused"
            };
            let title = format!("{title} [{state}]");
            let scroll = render_detail(frame, area, &title, &app.log_text(), app.detail_scroll());
            app.set_detail_scroll(scroll);
        }
        Layer::Confirm { prompt } => render_confirm(frame, area, prompt),
        Layer::Status { message, kind } => render_status(frame, area, message, *kind),
    }
}

fn render_table(frame: &mut Frame, area: Rect, page: &TablePage) {
    page.with_table(|table| {
        let visible_rows = table.visible_rows();
        let header_row = Row::new(table.headers.iter().enumerate().map(|(index, header)| {
            let style = if index == table.selected_column {
                Style::default()
                    .add_modifier(Modifier::BOLD)
                    .add_modifier(Modifier::UNDERLINED)
            } else {
                Style::default().add_modifier(Modifier::BOLD)
            };
            Cell::from(header.clone()).style(style)
        }))
        .height(1)
        .style(Style::default().fg(ACCENT));

        let rows = visible_rows.iter().map(|row| {
            Row::new(
                row.columns
                    .iter()
                    .map(|column| Cell::from(column.clone()).style(Style::default().fg(Color::White))),
            )
        });

        let mut title = format!("{} ({})", page.kind().title(), visible_rows.len());
        if !table.filter.is_empty() {
            title.push_str(&format!(" /{}", table.filter));
        }
        if let Some(refreshed) = table.last_refreshed {
            title.push_str(&format!(" @ {}", refreshed.format("%H:%M:%S")));
        }

        let block = Block::default()
            .title(title)
            .borders(Borders::ALL)
            .border_style(Style::default().fg(ACCENT))
            .style(Style::default().bg(PANEL));

        let table_widget = Table::new(rows, column_constraints(table.headers.len()))
            .header(header_row)
            .block(block)
            .column_spacing(1)
            .row_highlight_style(
                Style::default()
                    .bg(SELECTED_ROW)
                    .add_modifier(Modifier::BOLD),
            )
            .highlight_symbol("> ");

        let mut state = TableState::default();
        if !visible_rows.is_empty() {
            state.select(Some(table.selected));
        }
        frame.render_stateful_widget(table_widget, area, &mut state);
    });
}

fn render_menu(frame: &mut Frame, area: Rect, app: &App) {
    let popup = centered_rect(60, 80, area);
    frame.render_widget(Clear, popup);

    let mut lines = LOGO
        .lines()
        .map(|line| Line::from(Span::styled(line.to_string(), Style::default().fg(ACCENT))))
        .collect::<Vec<_>>();
    lines.push(Line::from(""));
    lines.push(key_value_line("axe version", env!("CARGO_PKG_VERSION")));
    lines.push(key_value_line("k8s version", app.server_version()));
    lines.push(Line::from(""));
    for (key, description) in SHORTCUTS {
        lines.push(key_value_line(key, description));
    }

    let menu = Paragraph::new(lines)
        .alignment(Alignment::Center)
        .block(
            Block::default()
                .title("Menu")
                .borders(Borders::ALL)
                .border_style(Style::default().fg(ACCENT))
                .style(Style::default().bg(PANEL)),
        )
        .style(Style::default().fg(Color::White));
    frame.render_widget(menu, popup);
}

/// Returns the scroll offset actually used, clamped to the text length.
fn render_detail(frame: &mut Frame, area: Rect, title: &str, body: &str, scroll: u16) -> u16 {
    frame.render_widget(Clear, area);
    let inner_height = area.height.saturating_sub(2);
    let max_scroll = (body.lines().count() as u16).saturating_sub(inner_height);
    let scroll = scroll.min(max_scroll);

    let paragraph = Paragraph::new(Text::from(body.to_string()))
        .block(
            Block::default()
                .title(format!("{title} (Esc to close)"))
                .borders(Borders::ALL)
                .border_style(Style::default().fg(ACCENT))
                .style(Style::default().bg(PANEL)),
        )
        .style(Style::default().fg(Color::White))
        .scroll((scroll, 0));
    frame.render_widget(paragraph, area);
    scroll
}

fn render_confirm(frame: &mut Frame, area: Rect, prompt: &str) {
    let popup = centered_rect(50, 20, area);
    frame.render_widget(Clear, popup);

    let dialog = Paragraph::new(vec![
        Line::from(prompt.to_string()),
        Line::from(""),
        Line::from(Span::styled(
            "y / Enter to confirm, n / Esc to cancel",
            Style::default().fg(MUTED),
        )),
    ])
    .alignment(Alignment::Center)
    .wrap(Wrap { trim: true })
    .block(
        Block::default()
            .title("Confirm")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(WARN))
            .style(Style::default().bg(PANEL)),
    )
    .style(Style::default().fg(Color::White));
    frame.render_widget(dialog, popup);
}

fn render_status(frame: &mut Frame, area: Rect, message: &str, kind: StatusKind) {
    let color = match kind {
        StatusKind::Progress => WARN,
        StatusKind::Error => ERROR,
    };
    let height = 3 + (message.lines().count() as u16).min(area.height.saturating_sub(5));
    let popup = Rect {
        x: area.x + 1,
        y: area.y + area.height.saturating_sub(height + 1),
        width: area.width.saturating_sub(2),
        height: height.min(area.height),
    };
    frame.render_widget(Clear, popup);

    let status = Paragraph::new(Text::from(message.to_string()))
        .wrap(Wrap { trim: false })
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(color))
                .style(Style::default().bg(PANEL)),
        )
        .style(Style::default().fg(color));
    frame.render_widget(status, popup);
}

fn render_footer(frame: &mut Frame, area: Rect, app: &App) {
    let mut spans = Vec::new();
    match app.mode() {
        InputMode::Search => {
            push_powerline_segment(&mut spans, " search ", Color::Black, WARN, PL_B);
            push_powerline_segment(&mut spans, format!(" /{} ", app.input()), Color::White, PL_B, BG);
        }
        InputMode::Command => {
            push_powerline_segment(&mut spans, " cmd ", Color::Black, ACCENT, PL_B);
            push_powerline_segment(&mut spans, format!(" :{} ", app.input()), Color::White, PL_B, BG);
        }
        InputMode::Normal | InputMode::Confirm => {
            let current = app.controller().current_name();
            for (index, kind) in app.pages().iter().enumerate() {
                let digit = (index + 1) % 10;
                let label = if index < 10 {
                    format!(" {digit}:{} ", kind.token())
                } else {
                    format!(" {} ", kind.token())
                };
                if kind.token() == current {
                    spans.push(Span::styled(
                        label,
                        Style::default()
                            .fg(Color::Black)
                            .bg(ACCENT)
                            .add_modifier(Modifier::BOLD),
                    ));
                } else {
                    spans.push(Span::styled(label, Style::default().fg(MUTED).bg(BG)));
                }
            }
        }
    }

    let status = format!(" {} ", compact_text(app.status(), 48));
    let mut right = Vec::new();
    push_powerline_segment(&mut right, status, Color::White, PL_A, BG);
    let right_width = (spans_width(&right) as u16).min(area.width / 2);

    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Min(1), Constraint::Length(right_width)])
        .split(area);
    frame.render_widget(
        Paragraph::new(Line::from(spans)).style(Style::default().bg(BG)),
        chunks[0],
    );
    frame.render_widget(
        Paragraph::new(Line::from(right))
            .style(Style::default().bg(BG))
            .alignment(Alignment::Right),
        chunks[1],
    );
}

fn key_value_line(key: &str, value: &str) -> Line<'static> {
    Line::from(vec![
        Span::styled(format!("{key:>12}  "), Style::default().fg(MUTED)),
        Span::styled(format!("{value:<28}"), Style::default().fg(Color::White)),
    ])
}

fn push_powerline_segment(
    spans: &mut Vec<Span<'static>>,
    content: impl Into<String>,
    fg: Color,
    bg: Color,
    next_bg: Color,
) {
    spans.push(Span::styled(
        content.into(),
        Style::default().fg(fg).bg(bg).add_modifier(Modifier::BOLD),
    ));
    spans.push(Span::styled("", Style::default().fg(bg).bg(next_bg)));
}

fn spans_width(spans: &[Span<'_>]) -> usize {
    spans.iter().map(|span| span.content.chars().count()).sum()
}

fn compact_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }

    if max_chars <= 1 {
        return "…".to_string();
    }

    let mut out = value
        .chars()
        .take(max_chars.saturating_sub(1))
        .collect::<String>();
    out.push('…');
    out
}

fn display_cluster_endpoint(cluster: &str) -> String {
    let trimmed = cluster.trim().trim_end_matches('/');
    trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .unwrap_or(trimmed)
        .to_string()
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

fn column_constraints(columns: usize) -> Vec<Constraint> {
    if columns == 0 {
        return vec![Constraint::Percentage(100)];
    }

    let width = (100 / columns as u16).max(1);
    (0..columns)
        .map(|_| Constraint::Percentage(width))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{column_constraints, compact_text, display_cluster_endpoint};
    use ratatui::layout::Constraint;

    #[test]
    fn compact_text_truncates_with_ellipsis() {
        assert_eq!(compact_text("pods", 10), "pods");
        assert_eq!(compact_text("deployments", 6), "deplo…");
        assert_eq!(compact_text("x", 1), "x");
        assert_eq!(compact_text("xyz", 1), "…");
    }

    #[test]
    fn cluster_endpoint_drops_scheme() {
        assert_eq!(
            display_cluster_endpoint("https://10.0.0.1:6443/"),
            "10.0.0.1:6443"
        );
        assert_eq!(display_cluster_endpoint("kind"), "kind");
    }

    #[test]
    fn column_constraints_split_evenly() {
        assert_eq!(column_constraints(0), vec![Constraint::Percentage(100)]);
        assert_eq!(column_constraints(4), vec![Constraint::Percentage(25); 4]);
    }
}
