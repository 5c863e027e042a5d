//! Operator overlay: log tail, room table and traffic counters, enabled by
//! `-n`/`-a` on the command line.

use std::collections::VecDeque;

use ratatui::Frame;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, List, ListItem, Paragraph, Row, Table};

use riptide::RoomInfo;

use crate::lobby::LobbyStats;

const MAX_LOG_LINES: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tab {
    Log,
    Rooms,
}

pub struct TuiState {
    logs: VecDeque<String>,
    tab: Tab,
    admin: bool,
    pub broadcast_input: String,
    pub composing: bool,
}

impl TuiState {
    pub fn new(admin: bool) -> Self {
        Self {
            logs: VecDeque::with_capacity(MAX_LOG_LINES),
            tab: Tab::Log,
            admin,
            broadcast_input: String::new(),
            composing: false,
        }
    }

    pub fn log(&mut self, line: impl Into<String>) {
        if self.logs.len() >= MAX_LOG_LINES {
            self.logs.pop_front();
        }
        self.logs.push_back(line.into());
    }

    pub fn next_tab(&mut self) {
        self.tab = match self.tab {
            Tab::Log => Tab::Rooms,
            Tab::Rooms => Tab::Log,
        };
    }

    pub fn tab(&self) -> Tab {
        self.tab
    }

    pub fn admin(&self) -> bool {
        self.admin
    }
}

pub fn render(frame: &mut Frame, state: &TuiState, stats: &LobbyStats, rooms: &[RoomInfo]) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(0),
            Constraint::Length(3),
        ])
        .split(frame.area());

    render_header(frame, chunks[0], stats);
    match state.tab() {
        Tab::Log => render_log(frame, chunks[1], state),
        Tab::Rooms => render_rooms(frame, chunks[1], rooms),
    }
    render_footer(frame, chunks[2], state);
}

fn render_header(frame: &mut Frame, area: Rect, stats: &LobbyStats) {
    let block = Block::default()
        .title(" riptide server ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    let net = &stats.network;
    let text = format!(
        "Rooms: {}  |  Clients: {}  |  In: {} / {} pkts  |  Out: {} / {} pkts  |  Malformed: {}",
        stats.rooms,
        stats.clients,
        format_bytes(net.bytes_received),
        net.packets_received,
        format_bytes(net.bytes_sent),
        net.packets_sent,
        net.malformed_packets,
    );

    frame.render_widget(Paragraph::new(text).block(block), area);
}

fn render_log(frame: &mut Frame, area: Rect, state: &TuiState) {
    let block = Block::default()
        .title(" Log ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Green));

    let visible = area.height.saturating_sub(2) as usize;
    let items: Vec<ListItem> = state
        .logs
        .iter()
        .rev()
        .take(visible)
        .rev()
        .map(|line| ListItem::new(line.as_str()))
        .collect();

    frame.render_widget(List::new(items).block(block), area);
}

fn render_rooms(frame: &mut Frame, area: Rect, rooms: &[RoomInfo]) {
    let block = Block::default()
        .title(" Rooms ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow));

    let rows: Vec<Row> = rooms
        .iter()
        .map(|room| {
            Row::new(vec![
                room.room_id.to_string(),
                room.name.clone(),
                room.port.to_string(),
                format!("{}/{}", room.players, room.capacity),
                format!("{:?}", room.state),
                format!("{:?}", room.difficulty),
            ])
        })
        .collect();

    let table = Table::new(
        rows,
        [
            Constraint::Length(6),
            Constraint::Min(16),
            Constraint::Length(8),
            Constraint::Length(8),
            Constraint::Length(10),
            Constraint::Length(10),
        ],
    )
    .header(
        Row::new(vec!["id", "name", "port", "players", "state", "difficulty"])
            .style(Style::default().add_modifier(Modifier::BOLD)),
    )
    .block(block);

    frame.render_widget(table, area);
}

fn render_footer(frame: &mut Frame, area: Rect, state: &TuiState) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));

    let line = if state.composing {
        Line::from(vec![
            Span::styled("broadcast> ", Style::default().fg(Color::Magenta)),
            Span::raw(state.broadcast_input.as_str()),
        ])
    } else if state.admin() {
        Line::from("q quit | tab switch view | b broadcast")
    } else {
        Line::from("q quit | tab switch view")
    };

    frame.render_widget(Paragraph::new(line).block(block), area);
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes}B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1}KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1}MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
