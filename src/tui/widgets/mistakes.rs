use chrono::DateTime;
use ratatui::{
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph},
    Frame,
};

use crate::tui::App;

pub fn draw(f: &mut Frame, app: &App, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .title(" Mistakes ")
        .title_style(Style::default().fg(Color::Cyan));

    if app.mistakes.items.is_empty() {
        f.render_widget(Paragraph::new("No mistakes recorded").block(block), area);
        return;
    }

    let items: Vec<ListItem> = app
        .mistakes
        .items
        .iter()
        .map(|m| {
            ListItem::new(Line::from(vec![
                Span::styled(
                    format!("{:<18}", m.source_key),
                    Style::default().fg(Color::White),
                ),
                Span::styled(
                    format!("#{:<5}", m.question_number),
                    Style::default().fg(Color::Cyan),
                ),
                Span::styled(
                    format!("picked {:<4}", m.picked_position),
                    Style::default().fg(Color::Red),
                ),
                Span::styled(format_when(&m.created_at), Style::default().fg(Color::Gray)),
            ]))
        })
        .collect();

    let list = List::new(items)
        .block(block)
        .highlight_style(
            Style::default()
                .bg(Color::DarkGray)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("> ");

    let mut state = ListState::default();
    state.select(app.mistakes.selected);
    f.render_stateful_widget(list, area, &mut state);
}

fn format_when(created_at: &str) -> String {
    match DateTime::parse_from_rfc3339(created_at) {
        Ok(dt) => dt.format("%b %d %H:%M").to_string(),
        Err(_) => created_at.to_string(),
    }
}
