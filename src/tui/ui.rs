use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Tabs},
    Frame,
};

use super::widgets::{mistakes, practice};
use super::{App, View};

pub fn draw(f: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Tab bar
            Constraint::Min(0),    // Content
            Constraint::Length(1), // Status line
            Constraint::Length(1), // Help bar
        ])
        .split(f.area());

    draw_tabs(f, app, chunks[0]);
    match app.view {
        View::Practice => practice::draw(f, app, chunks[1]),
        View::Mistakes => mistakes::draw(f, app, chunks[1]),
    }
    draw_status(f, app, chunks[2]);
    draw_help_bar(f, app, chunks[3]);
}

fn draw_tabs(f: &mut Frame, app: &App, area: Rect) {
    let selected = match app.view {
        View::Practice => 0,
        View::Mistakes => 1,
    };
    let titles = vec![
        "Practice".to_string(),
        format!("Mistakes ({})", app.mistakes.items.len()),
    ];

    let tabs = Tabs::new(titles)
        .block(Block::default().borders(Borders::ALL).title(" Shiken "))
        .select(selected)
        .style(Style::default().fg(Color::White))
        .highlight_style(
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        );

    f.render_widget(tabs, area);
}

fn draw_status(f: &mut Frame, app: &App, area: Rect) {
    let line = match &app.status {
        Some(msg) if msg.starts_with("Correct") => {
            Line::from(Span::styled(msg.as_str(), Style::default().fg(Color::Green)))
        }
        Some(msg) => Line::from(Span::styled(msg.as_str(), Style::default().fg(Color::Red))),
        None => Line::from(""),
    };
    f.render_widget(Paragraph::new(line), area);
}

fn key(label: &str) -> Span<'_> {
    Span::styled(label, Style::default().fg(Color::Cyan))
}

fn draw_help_bar(f: &mut Frame, app: &App, area: Rect) {
    let mut spans = vec![key("<Tab>"), Span::raw(" View  ")];

    match app.view {
        View::Practice => spans.extend(vec![
            key("1-9"),
            Span::raw(" Pick  "),
            key("<CR>"),
            Span::raw(" Submit  "),
            key("h/l"),
            Span::raw(" Prev/Next  "),
            key("g/G"),
            Span::raw(" First/Last  "),
        ]),
        View::Mistakes => spans.extend(vec![
            key("j/k"),
            Span::raw(" Nav  "),
            key("g/G"),
            Span::raw(" Top/Bot  "),
            key("^r"),
            Span::raw(" Refresh  "),
        ]),
    }

    spans.extend(vec![key("q"), Span::raw(" Quit")]);

    let help = Paragraph::new(Line::from(spans)).style(Style::default().bg(Color::DarkGray));
    f.render_widget(help, area);
}
