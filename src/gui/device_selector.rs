use std::{
    io::stdout,
    path::{Path, PathBuf},
};

use crate::gui::error::GuiError;

use crossterm::{
    event::{self, KeyCode, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    ExecutableCommand,
};
use ratatui::{
    prelude::*,
    widgets::{
        block::{Position, Title},
        *,
    },
    Terminal,
};

// Name fragments of the USB serial bridges printer boards ship with
const PRINTER_HINTS: [&str; 4] = ["ttyUSB", "ttyACM", "usbserial", "usbmodem"];

/// Lets the user pick the printer's serial port, which will be opened at
/// `baud_rate`. The cursor starts on the first port that looks like a USB
/// printer board. `None` if they quit, or if there was nothing to pick from.
pub fn device_selector(
    mut available_ports: Vec<PathBuf>,
    baud_rate: u32,
) -> Result<Option<PathBuf>, GuiError> {
    let n_ports = available_ports.len();
    if n_ports == 0 {
        return Ok(None);
    }

    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;
    terminal.clear()?;

    let mut cursor = likely_printer(&available_ports);
    let mut list_state = ListState::default().with_selected(Some(cursor));
    let mut selected_port = None;
    loop {
        let title = Title::from(Span::styled(
            format!(" Printer Port @ {} baud ", baud_rate),
            Style::default().fg(Color::Magenta).add_modifier(Modifier::BOLD),
        ));
        let instructions = Title::from(Line::from(vec![
            " Navigate ".into(),
            "<Up>/<Down>".magenta().bold(),
            " Select ".into(),
            "<Enter>".magenta().bold(),
            " Quit ".into(),
            "<Q> ".magenta().bold(),
        ]));
        let block = Block::default()
            .title(title.alignment(Alignment::Center))
            .title(
                instructions
                    .alignment(Alignment::Center)
                    .position(Position::Bottom),
            )
            .borders(Borders::ALL);
        let port_names = available_ports.iter().map(|p| {
            let name = p.to_string_lossy();
            if looks_like_printer(p) {
                format!("{}  (usb serial)", name)
            } else {
                name.into_owned()
            }
        });
        let list = List::new(port_names)
            .style(Style::default().fg(Color::White))
            .highlight_symbol(">>")
            .highlight_style(Style::default().fg(Color::Magenta))
            .block(block);
        list_state.select(Some(cursor));
        terminal.draw(|frame| {
            let area = frame.size();
            frame.render_stateful_widget(list, area, &mut list_state);
        })?;
        if event::poll(std::time::Duration::from_millis(16))? {
            if let event::Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Down => cursor = (cursor + 1) % n_ports,
                        KeyCode::Up => cursor = (cursor + n_ports - 1) % n_ports,
                        KeyCode::Enter => {
                            selected_port = Some(cursor);
                            break;
                        }
                        KeyCode::Char('q') | KeyCode::Esc => break,
                        _ => {}
                    }
                }
            }
        }
    }

    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    Ok(selected_port.map(|i| available_ports.swap_remove(i)))
}

fn looks_like_printer(port: &Path) -> bool {
    let name = port.to_string_lossy();
    PRINTER_HINTS.iter().any(|hint| name.contains(hint))
}

fn likely_printer(ports: &[PathBuf]) -> usize {
    ports.iter().position(|p| looks_like_printer(p)).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nothing_to_pick_from() {
        assert_eq!(device_selector(vec![], 250000).unwrap(), None);
    }

    #[test]
    fn cursor_starts_on_a_usb_bridge() {
        let ports: Vec<PathBuf> = ["/dev/ttyS0", "/dev/ttyS1", "/dev/ttyUSB0", "/dev/ttyACM0"]
            .iter()
            .map(PathBuf::from)
            .collect();
        assert_eq!(likely_printer(&ports), 2);

        let mac = vec![
            PathBuf::from("/dev/cu.Bluetooth-Incoming-Port"),
            PathBuf::from("/dev/cu.usbmodem14101"),
        ];
        assert_eq!(likely_printer(&mac), 1);

        let plain = vec![PathBuf::from("/dev/ttyS0")];
        assert_eq!(likely_printer(&plain), 0);
    }
}
