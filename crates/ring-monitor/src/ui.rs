use crate::state::App;
use crate::theme::{self, icons};
use chrono::{DateTime, Utc};
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Modifier, Style},
    symbols::Marker,
    text::{Line, Span},
    widgets::{
        canvas::{Canvas, Circle, Line as CanvasLine, Points},
        Block, Borders, Paragraph, Wrap,
    },
    Frame,
};

const RING_BOUNDS: f64 = 1.3;
const NODE_RADIUS: f64 = 0.04;
const ID_WIDTH: usize = 12;
const BAR_WIDTH: usize = 10;
const FEED_HEIGHT: u16 = 10;

pub fn render(f: &mut Frame, app: &App, now: DateTime<Utc>) {
    let area = f.size();
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(8),
            Constraint::Length(1),
        ])
        .split(area);

    render_header(f, app, now, rows[0]);

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
        .split(rows[1]);
    render_ring(f, app, now, body[0]);

    let side = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(4), Constraint::Length(FEED_HEIGHT)])
        .split(body[1]);
    render_nodes(f, app, side[0]);
    render_feed(f, app, now, side[1]);

    render_footer(f, app, rows[2]);
}

fn panel(title: &str) -> Block<'_> {
    Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(theme::BORDER))
        .title(Span::styled(format!(" {title} "), theme::HEADER_STYLE))
}

fn render_header(f: &mut Frame, app: &App, now: DateTime<Utc>, area: Rect) {
    let (stream_icon, stream_label, stream_color) = if app.stream_connected() {
        (icons::LIVE, "live", theme::LIVE)
    } else {
        (icons::OFFLINE, "offline", theme::OFFLINE)
    };
    let mut spans = vec![
        Span::styled(format!("{stream_icon} {stream_label}"), Style::default().fg(stream_color)),
        Span::raw("  "),
    ];
    match app.view() {
        Some(view) => {
            let snapshot = &view.snapshot;
            let age = (now - snapshot.observed_at()).num_seconds().max(0);
            spans.push(Span::raw(format!(
                "size {}  nodes {}  keys {}  via {} {}s ago",
                snapshot.ring_size(),
                snapshot.nodes().len(),
                app.tracked_keys(),
                snapshot.provenance(),
                age
            )));
            let violations = snapshot.capacity_violations().len();
            if violations > 0 {
                spans.push(Span::raw("  "));
                spans.push(Span::styled(
                    format!("{violations} over capacity"),
                    theme::WARN_STYLE,
                ));
            }
        }
        None => spans.push(Span::styled("no ring state yet", theme::MUTED_STYLE)),
    }
    spans.push(Span::styled(
        format!(
            "  stored {}  malformed {}",
            app.keys_stored(),
            app.malformed_frames()
        ),
        theme::MUTED_STYLE,
    ));
    if app.busy() {
        spans.push(Span::styled("  ...", theme::MUTED_STYLE));
    }
    let widget = Paragraph::new(Line::from(spans)).block(panel(&app.base_url));
    f.render_widget(widget, area);
}

fn render_ring(f: &mut Frame, app: &App, now: DateTime<Utc>, area: Rect) {
    let block = panel("ring");
    let Some(view) = app.view() else {
        f.render_widget(
            Paragraph::new(Span::styled("waiting for ring state", theme::MUTED_STYLE)).block(block),
            area,
        );
        return;
    };
    if view.snapshot.is_empty() {
        f.render_widget(
            Paragraph::new(Span::styled("ring is empty (a: add node)", theme::MUTED_STYLE))
                .block(block),
            area,
        );
        return;
    }

    let selected = app.selected_node_id();
    // Canvas y grows upward; ring coordinates grow downward.
    let nodes: Vec<(f64, f64, String, ratatui::style::Color)> = view
        .snapshot
        .nodes()
        .iter()
        .filter_map(|node| {
            let position = view.positions.get(node.node_id())?;
            let color = if Some(node.node_id()) == selected {
                theme::NODE_SELECTED
            } else if node.is_over_capacity() {
                theme::NODE_OVER_CAPACITY
            } else {
                theme::NODE
            };
            Some((
                position.x,
                -position.y,
                node.ring_position().to_string(),
                color,
            ))
        })
        .collect();
    let movers: Vec<(f64, f64, f64, f64, f64)> = app
        .feed()
        .filter_map(|entry| {
            let progress = entry.progress(now)?;
            let from = entry.path.from?;
            let to = entry.path.to?;
            Some((from.x, -from.y, to.x, -to.y, progress))
        })
        .collect();

    let canvas = Canvas::default()
        .block(block)
        .marker(Marker::Braille)
        .x_bounds([-RING_BOUNDS, RING_BOUNDS])
        .y_bounds([-RING_BOUNDS, RING_BOUNDS])
        .paint(move |ctx| {
            ctx.draw(&Circle {
                x: 0.0,
                y: 0.0,
                radius: 1.0,
                color: theme::RING,
            });
            for (x1, y1, x2, y2, _) in &movers {
                ctx.draw(&CanvasLine {
                    x1: *x1,
                    y1: *y1,
                    x2: *x2,
                    y2: *y2,
                    color: theme::TRAIL,
                });
            }
            ctx.layer();
            for (x, y, label, color) in &nodes {
                ctx.draw(&Circle {
                    x: *x,
                    y: *y,
                    radius: NODE_RADIUS,
                    color: *color,
                });
                ctx.print(
                    *x + NODE_RADIUS,
                    *y + NODE_RADIUS,
                    Span::styled(label.clone(), Style::default().fg(*color)),
                );
            }
            for (x1, y1, x2, y2, progress) in &movers {
                ctx.draw(&Points {
                    coords: &[(x1 + (x2 - x1) * progress, y1 + (y2 - y1) * progress)],
                    color: theme::KEY_IN_FLIGHT,
                });
            }
        });
    f.render_widget(canvas, area);
}

fn render_nodes(f: &mut Frame, app: &App, area: Rect) {
    let block = panel("nodes");
    let Some(view) = app.view() else {
        f.render_widget(Paragraph::new("").block(block), area);
        return;
    };
    let selected = app.selected_node_id();
    let lines: Vec<Line> = view
        .snapshot
        .nodes()
        .iter()
        .map(|node| {
            let is_selected = Some(node.node_id()) == selected;
            let marker = if is_selected { icons::SELECTED } else { " " };
            let keys = node
                .keys()
                .map(|keys| format!("{} keys", keys.len()))
                .unwrap_or_else(|| "keys ?".to_string());
            let id_style = if is_selected {
                theme::SELECTED_STYLE
            } else {
                Style::default().add_modifier(Modifier::BOLD)
            };
            Line::from(vec![
                Span::raw(format!("{marker} ")),
                Span::styled(
                    format!("{:<width$}", truncate_id(node.node_id(), ID_WIDTH), width = ID_WIDTH),
                    id_style,
                ),
                Span::styled(format!(" @{:>5} ", node.ring_position()), theme::MUTED_STYLE),
                Span::styled(
                    load_bar(node.load_ratio(), BAR_WIDTH),
                    Style::default().fg(theme::load_color(node.load_ratio())),
                ),
                Span::raw(format!(
                    " {}/{}  {keys}",
                    node.filled_count(),
                    node.slot_capacity()
                )),
            ])
        })
        .collect();
    f.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_feed(f: &mut Frame, app: &App, now: DateTime<Utc>, area: Rect) {
    let lines: Vec<Line> = app
        .feed()
        .rev()
        .map(|entry| {
            let fact = &entry.path.fact;
            let style = if entry.progress(now).is_some() {
                Style::default().fg(theme::KEY_IN_FLIGHT)
            } else {
                Style::default()
            };
            Line::from(vec![
                Span::styled(fact.key.clone(), style.add_modifier(Modifier::BOLD)),
                Span::raw(format!(
                    "  {} {} {}",
                    truncate_id(&fact.from, ID_WIDTH),
                    icons::ARROW,
                    truncate_id(&fact.to, ID_WIDTH)
                )),
                Span::styled(format!("  {}s", entry.age_secs(now)), theme::MUTED_STYLE),
            ])
        })
        .collect();
    f.render_widget(Paragraph::new(lines).block(panel("migrations")), area);
}

fn render_footer(f: &mut Frame, app: &App, area: Rect) {
    let line = match app.status_note() {
        Some(note) => Line::from(Span::raw(note.to_string())),
        None => Line::from(vec![
            Span::styled("j/k", theme::KEY_HINT_STYLE),
            Span::raw(" select  "),
            Span::styled("a", theme::KEY_HINT_STYLE),
            Span::raw(" add  "),
            Span::styled("d", theme::KEY_HINT_STYLE),
            Span::raw(" delete  "),
            Span::styled("r", theme::KEY_HINT_STYLE),
            Span::raw(" poll  "),
            Span::styled("q", theme::KEY_HINT_STYLE),
            Span::raw(" quit"),
        ]),
    };
    f.render_widget(Paragraph::new(line).wrap(Wrap { trim: true }), area);
}

/// Shortens an id by cutting its middle, keeping both ends readable.
pub fn truncate_id(id: &str, max: usize) -> String {
    let count = id.chars().count();
    if count <= max || max < 5 {
        return id.to_string();
    }
    let head = (max - 3) / 2;
    let tail = max - 3 - head;
    let start: String = id.chars().take(head).collect();
    let end: String = id.chars().skip(count - tail).collect();
    format!("{start}...{end}")
}

fn load_bar(ratio: Option<f64>, width: usize) -> String {
    let Some(ratio) = ratio else {
        return "-".repeat(width);
    };
    let filled = ((ratio.clamp(0.0, 1.0) * width as f64).round() as usize).min(width);
    format!(
        "{}{}",
        icons::BAR_FULL.repeat(filled),
        icons::BAR_EMPTY.repeat(width - filled)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_ids_are_untouched() {
        assert_eq!(truncate_id("node-1", 12), "node-1");
    }

    #[test]
    fn long_ids_keep_both_ends() {
        let id = "3f9a1c2b7e6d5f4a";
        let short = truncate_id(id, 12);
        assert_eq!(short, "3f9a...d5f4a");
        assert_eq!(short.chars().count(), 12);
    }

    #[test]
    fn load_bar_scales_and_saturates() {
        assert_eq!(load_bar(Some(0.5), 4), "##..");
        assert_eq!(load_bar(Some(1.7), 4), "####");
        assert_eq!(load_bar(None, 3), "---");
    }
}
