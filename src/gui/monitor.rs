use std::{
    io::stdout,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc, Mutex,
    },
    thread::spawn,
    time::Duration,
};

use crate::choreographer::{Phase, Status};
use crate::gui::error::GuiError;
use crate::spectral::LoudnessCategory;

use crossterm::{
    event::{self, KeyEventKind},
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

/// Runs `work` on its own thread and shows `status` until it returns.
///
/// Any key press raises `stop`; the view stays up until `work` notices the
/// flag and hands back its result. If the terminal fails, `stop` is raised
/// as well and `work` is still waited for before the error comes back.
pub fn monitor_until_stop<F, T>(
    status: Arc<Mutex<Status>>,
    stop: Arc<AtomicBool>,
    work: F,
) -> Result<T, GuiError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    enable_raw_mode()?;
    if let Err(e) = stdout().execute(EnterAlternateScreen) {
        let _ = disable_raw_mode();
        return Err(e.into());
    }

    let res = Terminal::new(CrosstermBackend::new(stdout()))
        .map_err(GuiError::from)
        .and_then(|mut terminal| {
            terminal.clear()?;
            supervise(stop.clone(), work, |stopping| {
                let snapshot = status.lock().unwrap().clone();
                terminal.draw(|frame| {
                    let area = frame.size();
                    frame.render_widget(status_view(&snapshot, stopping), area);
                })?;

                if event::poll(Duration::from_millis(16))? {
                    if let event::Event::Key(key) = event::read()? {
                        if key.kind == KeyEventKind::Press {
                            stop.store(true, Ordering::SeqCst);
                        }
                    }
                }
                Ok(())
            })
        });

    let restored = disable_raw_mode()
        .and_then(|_| stdout().execute(LeaveAlternateScreen).map(|_| ()));
    let res = res?;
    restored?;
    Ok(res)
}

// Runs `work` on a thread and calls `tick` until it finishes. A failing
// tick raises `stop`, and the worker is joined before the error is returned.
fn supervise<F, T, G>(stop: Arc<AtomicBool>, work: F, mut tick: G) -> Result<T, GuiError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
    G: FnMut(bool) -> Result<(), GuiError>,
{
    let (res_tx, res_rx) = mpsc::channel();
    let th = spawn(move || {
        let _ = res_tx.send(work());
    });

    let res = loop {
        match res_rx.try_recv() {
            Ok(res) => break Ok(res),
            Err(mpsc::TryRecvError::Empty) => {}
            Err(e) => break Err(GuiError::from(e)),
        }

        if let Err(e) = tick(stop.load(Ordering::SeqCst)) {
            stop.store(true, Ordering::SeqCst);
            // let the in-flight move settle before giving up on the view
            let _ = res_rx.recv();
            break Err(e);
        }
    };

    th.join().map_err(|_| GuiError::JoinError)?;
    res
}

fn status_view(status: &Status, stopping: bool) -> Paragraph<'static> {
    let title = Title::from(" Choreographing... ".magenta().bold());
    let footer = if stopping {
        Title::from(" Stopping after the current move ".yellow().bold())
    } else {
        Title::from(Line::from(vec![
            " Stop ".into(),
            "<Any key> ".magenta().bold(),
        ]))
    };
    let block = Block::default()
        .title(title.alignment(Alignment::Center))
        .title(footer.alignment(Alignment::Center).position(Position::Bottom))
        .borders(Borders::ALL);

    let phase_color = match status.phase {
        Phase::Faulted => Color::Red,
        _ => Color::Green,
    };
    let phase = Span::styled(
        format!("{:?}", status.phase),
        Style::default().fg(phase_color).add_modifier(Modifier::BOLD),
    );
    let note = status
        .note
        .map(|n| n.to_string())
        .unwrap_or_else(|| "-".to_owned());

    Paragraph::new(vec![
        Line::from(vec![" Phase:    ".into(), phase]),
        Line::from(format!(" Position: {}", status.position)),
        Line::from(format!(
            " Note:     {} ({:.2} Hz)",
            note, status.frequency_hz
        )),
        Line::from(format!(
            " Loudness: {:.3} ({})",
            status.loudness,
            LoudnessCategory::from_rms(status.loudness)
        )),
        Line::from(format!(
            " Moves:    {} sent, {} skipped, {} corrected",
            status.moves, status.skipped, status.corrections
        )),
    ])
    .block(block)
}
