use ratatui::style::{Color, Modifier, Style};

pub const HEADER_STYLE: Style = Style::new()
    .fg(Color::Rgb(142, 192, 124))
    .add_modifier(Modifier::BOLD);
pub const SELECTED_STYLE: Style = Style::new()
    .bg(Color::Rgb(131, 165, 152))
    .fg(Color::Black)
    .add_modifier(Modifier::BOLD);
pub const MUTED_STYLE: Style = Style::new().fg(Color::Rgb(146, 131, 116));
pub const KEY_HINT_STYLE: Style = Style::new().fg(Color::Cyan);
pub const WARN_STYLE: Style = Style::new()
    .fg(Color::Rgb(251, 73, 52))
    .add_modifier(Modifier::BOLD);

pub const BORDER: Color = Color::Rgb(80, 73, 69);
pub const RING: Color = Color::Rgb(102, 92, 84);
pub const NODE: Color = Color::Rgb(131, 165, 152);
pub const NODE_SELECTED: Color = Color::Rgb(250, 189, 47);
pub const NODE_OVER_CAPACITY: Color = Color::Rgb(251, 73, 52);
pub const TRAIL: Color = Color::Rgb(69, 133, 136);
pub const KEY_IN_FLIGHT: Color = Color::Rgb(254, 128, 25);
pub const LIVE: Color = Color::Rgb(142, 192, 124);
pub const OFFLINE: Color = Color::Rgb(251, 73, 52);

pub mod icons {
    pub const SELECTED: &str = ">";
    pub const ARROW: &str = "->";
    pub const BAR_FULL: &str = "#";
    pub const BAR_EMPTY: &str = ".";
    pub const LIVE: &str = "*";
    pub const OFFLINE: &str = "x";
}

/// Fill-bar color: green under half, yellow under full, red at or above.
pub fn load_color(ratio: Option<f64>) -> Color {
    match ratio {
        None => Color::Rgb(146, 131, 116),
        Some(r) if r >= 1.0 => Color::Rgb(251, 73, 52),
        Some(r) if r >= 0.5 => Color::Rgb(250, 189, 47),
        Some(_) => Color::Rgb(142, 192, 124),
    }
}
