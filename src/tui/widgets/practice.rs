use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, Paragraph, Wrap},
    Frame,
};

use crate::models::{PoolChoice, PoolQuestion};
use crate::session::{Session, SessionSnapshot, SessionState};
use crate::tui::App;

pub fn draw(f: &mut Frame, app: &App, area: Rect) {
    let snapshot = app.session.snapshot();
    let Some(question) = snapshot.question else {
        let block = Block::default().borders(Borders::ALL).title(" Practice ");
        let paragraph = Paragraph::new("No questions loaded").block(block);
        f.render_widget(paragraph, area);
        return;
    };

    let passage_height = if question.passage.is_some() { 8 } else { 0 };
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),              // Progress
            Constraint::Length(passage_height), // Passage
            Constraint::Length(5),              // Stem
            Constraint::Min(0),                 // Choices
        ])
        .split(area);

    draw_progress(f, &app.session, &snapshot, question, chunks[0]);
    if let Some(passage) = &question.passage {
        let block = Block::default().borders(Borders::ALL).title(" Passage ");
        f.render_widget(
            Paragraph::new(passage.as_str()).block(block).wrap(Wrap { trim: true }),
            chunks[1],
        );
    }
    draw_stem(f, question, chunks[2]);
    draw_choices(f, &snapshot, question, chunks[3]);
}

fn draw_progress(
    f: &mut Frame,
    session: &Session,
    snapshot: &SessionSnapshot<'_>,
    question: &PoolQuestion,
    area: Rect,
) {
    let score_color = if snapshot.total == 0 || snapshot.score * 2 >= snapshot.total {
        Color::Green
    } else {
        Color::Red
    };

    let mut spans = vec![
        Span::styled("Question ", Style::default().fg(Color::Gray)),
        Span::styled(
            format!("{}/{}", snapshot.index + 1, snapshot.len),
            Style::default().fg(Color::White),
        ),
        Span::raw("  "),
        Span::styled(question.exam_key.as_str(), Style::default().fg(Color::Cyan)),
        Span::styled(
            format!(" #{} {}", question.question_number, question.section.as_str()),
            Style::default().fg(Color::Cyan),
        ),
        Span::raw("  "),
        Span::styled("Score: ", Style::default().fg(Color::Gray)),
        Span::styled(
            format!("{}/{}", snapshot.score, snapshot.total),
            Style::default().fg(score_color),
        ),
    ];
    if snapshot.len <= 40 {
        spans.push(Span::raw("  "));
        spans.push(Span::styled(answer_strip(session), Style::default().fg(Color::DarkGray)));
    }
    if snapshot.complete {
        spans.push(Span::styled(
            "  complete",
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
        ));
    }

    let block = Block::default().borders(Borders::ALL).title(" Progress ");
    f.render_widget(Paragraph::new(Line::from(spans)).block(block), area);
}

// One mark per question, in pool order
fn answer_strip(session: &Session) -> String {
    (0..session.len())
        .map(|i| match session.state_at(i) {
            Some(SessionState::Answered) => '●',
            Some(SessionState::AnswerPending) => '◐',
            _ => '·',
        })
        .collect()
}

fn draw_stem(f: &mut Frame, question: &PoolQuestion, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .title(" Question ")
        .title_style(
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        );
    f.render_widget(
        Paragraph::new(question.stem.as_str())
            .block(block)
            .wrap(Wrap { trim: true }),
        area,
    );
}

fn draw_choices(
    f: &mut Frame,
    snapshot: &SessionSnapshot<'_>,
    question: &PoolQuestion,
    area: Rect,
) {
    let answered = snapshot.last_correct.is_some();

    let items: Vec<ListItem> = question
        .choices
        .iter()
        .map(|choice| {
            let selected = snapshot.selected == Some(choice.position);
            let marker = if selected { "> " } else { "  " };
            let mut lines = vec![Line::from(vec![
                Span::raw(marker),
                Span::styled(
                    format!("{}. ", choice.position),
                    Style::default().fg(Color::DarkGray),
                ),
                Span::styled(choice.content.as_str(), choice_style(choice, selected, answered)),
            ])];
            if answered {
                if let Some(explanation) = &choice.explanation {
                    lines.push(Line::from(Span::styled(
                        format!("     {}", explanation),
                        Style::default().fg(Color::Gray),
                    )));
                }
            }
            ListItem::new(lines)
        })
        .collect();

    let block = Block::default().borders(Borders::ALL).title(" Choices ");
    f.render_widget(List::new(items).block(block), area);
}

fn choice_style(choice: &PoolChoice, selected: bool, answered: bool) -> Style {
    match (answered, choice.is_correct, selected) {
        (true, true, _) => Style::default().fg(Color::Green).add_modifier(Modifier::BOLD),
        (true, false, true) => Style::default().fg(Color::Red),
        (false, _, true) => Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
        _ => Style::default().fg(Color::White),
    }
}
