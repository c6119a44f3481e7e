use std::fmt::Display;
use std::io::IsTerminal;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Colour {
    Red = 31,
    Green = 32,
    Yellow = 33,
}

/// True when stdout is a terminal and `NO_COLOR` is unset.
pub fn colour_enabled() -> bool {
    static ENABLED: OnceLock<bool> = OnceLock::new();
    *ENABLED
        .get_or_init(|| std::io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none())
}

pub fn paint(colour: Colour, text: impl Display) -> String {
    paint_if(colour_enabled(), colour, text)
}

fn paint_if(enabled: bool, colour: Colour, text: impl Display) -> String {
    if enabled {
        format!("\x1b[{}m{}\x1b[0m", colour as u8, text)
    } else {
        text.to_string()
    }
}
