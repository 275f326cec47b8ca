//! Fire-and-forget notification sound.
//!
//! Playback failures never reach the caller: a blocked or missing output
//! device must not stop the toast from showing.

use std::io::Write;
use tracing::debug;

use crate::reconcile::SoundCue;

pub trait SoundPlayer: Send + Sync {
    fn play(&self, cue: &SoundCue) -> Result<(), String>;
}

/// Rings the terminal bell on stderr.
pub struct TerminalBell;

impl SoundPlayer for TerminalBell {
    fn play(&self, _cue: &SoundCue) -> Result<(), String> {
        let mut stderr = std::io::stderr().lock();
        stderr
            .write_all(b"\x07")
            .and_then(|_| stderr.flush())
            .map_err(|e| format!("terminal bell: {e}"))
    }
}

pub struct Silent;

impl SoundPlayer for Silent {
    fn play(&self, _cue: &SoundCue) -> Result<(), String> {
        Ok(())
    }
}

/// Play `cue`, swallowing any failure.
pub fn play_quietly(player: &dyn SoundPlayer, cue: &SoundCue) {
    if let Err(e) = player.play(cue) {
        debug!(
            order_id = %cue.order_id,
            status = %cue.status,
            error = %e,
            "Notification sound failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::OrderStatus;

    struct Blocked;

    impl SoundPlayer for Blocked {
        fn play(&self, _cue: &SoundCue) -> Result<(), String> {
            Err("autoplay blocked".into())
        }
    }

    #[test]
    fn test_play_quietly_swallows_failures() {
        let cue = SoundCue {
            order_id: "O1".into(),
            status: OrderStatus::Delivered,
        };
        play_quietly(&Blocked, &cue);
        play_quietly(&Silent, &cue);
    }
}
