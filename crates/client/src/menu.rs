//! Connect menu: collects the lobby host:port when `--default` is not given.

use std::io;
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal::{self, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{cursor, execute};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::style::{Color, Style};
use ratatui::text::Line;
use ratatui::widgets::{Block, Borders, Paragraph};

use riptide::IpEndpoint;

/// Returns `None` when the user backs out.
pub fn run_menu(default_addr: &str) -> io::Result<Option<IpEndpoint>> {
    terminal::enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, cursor::Hide)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut input = default_addr.to_string();
    let mut error: Option<String> = None;
    let result = loop {
        terminal.draw(|frame| {
            let chunks = Layout::default()
                .direction(Direction::Vertical)
                .margin(2)
                .constraints([
                    Constraint::Length(3),
                    Constraint::Length(3),
                    Constraint::Length(2),
                    Constraint::Min(0),
                ])
                .split(frame.area());

            let title = Paragraph::new(" riptide ").block(
                Block::default()
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(Color::Cyan)),
            );
            frame.render_widget(title, chunks[0]);

            let field = Paragraph::new(input.as_str()).block(
                Block::default()
                    .title(" lobby address ")
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(Color::Yellow)),
            );
            frame.render_widget(field, chunks[1]);

            let hint = match &error {
                Some(err) => Line::styled(err.clone(), Style::default().fg(Color::Red)),
                None => Line::styled(
                    "enter connect | esc quit",
                    Style::default().fg(Color::DarkGray),
                ),
            };
            frame.render_widget(Paragraph::new(hint), chunks[2]);
        })?;

        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                if key.modifiers.contains(KeyModifiers::CONTROL)
                    && key.code == KeyCode::Char('c')
                {
                    break None;
                }
                match key.code {
                    KeyCode::Esc => break None,
                    KeyCode::Enter => match input.parse::<IpEndpoint>() {
                        Ok(endpoint) => break Some(endpoint),
                        Err(e) => error = Some(format!("invalid address: {e}")),
                    },
                    KeyCode::Backspace => {
                        input.pop();
                    }
                    KeyCode::Char(c) => {
                        error = None;
                        input.push(c);
                    }
                    _ => {}
                }
            }
        }
    };

    terminal::disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, cursor::Show)?;
    Ok(result)
}
