//! Line-oriented guest console.
//!
//! Stands in for the bell and toast widgets when the notifier runs headless:
//! each input line is one guest action, and session events are printed as
//! they arrive.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::FeedClient;
use crate::poller::PageVisibility;
use crate::session::{NotificationEvent, NotificationHandle, PresentationState};

const DEFAULT_CANCEL_REASON: &str = "Cancelled by guest";

const HELP: &str = "commands: open | close | dismiss <id> | remove <id> | \
cancel <id> [reason] | state | hide | show | quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    OpenBell,
    CloseBell,
    Dismiss(String),
    Remove(String),
    Cancel { order_id: String, reason: String },
    State,
    Hide,
    Show,
    Help,
    Quit,
}

/// Parse one input line. Blank lines and unknown verbs yield `None`.
pub fn parse_command(line: &str) -> Option<ConsoleCommand> {
    let mut parts = line.split_whitespace();
    let verb = parts.next()?.to_ascii_lowercase();
    let arg = parts.next().map(str::to_string);

    match verb.as_str() {
        "open" | "bell" => Some(ConsoleCommand::OpenBell),
        "close" => Some(ConsoleCommand::CloseBell),
        "dismiss" | "x" => arg.map(ConsoleCommand::Dismiss),
        "remove" | "rm" => arg.map(ConsoleCommand::Remove),
        "cancel" => {
            let order_id = arg?;
            let reason = parts.collect::<Vec<_>>().join(" ");
            let reason = if reason.is_empty() {
                DEFAULT_CANCEL_REASON.to_string()
            } else {
                reason
            };
            Some(ConsoleCommand::Cancel { order_id, reason })
        }
        "state" | "ls" => Some(ConsoleCommand::State),
        "hide" => Some(ConsoleCommand::Hide),
        "show" => Some(ConsoleCommand::Show),
        "help" | "?" => Some(ConsoleCommand::Help),
        "quit" | "exit" | "q" => Some(ConsoleCommand::Quit),
        _ => None,
    }
}

/// One-line rendering of a session event, or `None` for events the console
/// does not print.
pub fn describe_event(event: &NotificationEvent) -> Option<String> {
    match event {
        NotificationEvent::ToastAdded { toast } => {
            let mut line = format!(
                "{} {} (order {}, room {})",
                toast.emoji, toast.message, toast.order_id, toast.room_number
            );
            if let Some(reason) = &toast.reason {
                line.push_str(&format!(" - {reason}"));
            }
            Some(line)
        }
        NotificationEvent::UnreadCountChanged { count } => Some(format!("unread: {count}")),
        NotificationEvent::OrderRemoved { order_id, .. } => {
            Some(format!("removed order {order_id} from bell"))
        }
        _ => None,
    }
}

pub fn render_state(state: &PresentationState) -> String {
    let mut out = format!(
        "room {} | unread {} | bell {}\n",
        state.room_number,
        state.unread_count,
        if state.popup_open { "open" } else { "closed" }
    );
    for toast in &state.toasts {
        out.push_str(&format!("  toast {} {} {}\n", toast.order_id, toast.emoji, toast.message));
    }
    if state.popup_open {
        for entry in &state.bell_entries {
            out.push_str(&format!(
                "  {} {} {} {} [{}] {:.2}{}\n",
                if entry.seen { " " } else { "*" },
                entry.order_id,
                entry.emoji,
                entry.message,
                entry.item_summary,
                entry.total,
                entry
                    .reason
                    .as_ref()
                    .map(|r| format!(" - {r}"))
                    .unwrap_or_default()
            ));
        }
    }
    out
}

pub struct Console {
    session: NotificationHandle,
    client: FeedClient,
    visibility: PageVisibility,
}

impl Console {
    pub fn new(
        session: NotificationHandle,
        client: FeedClient,
        visibility: PageVisibility,
    ) -> Self {
        Self {
            session,
            client,
            visibility,
        }
    }

    /// Read commands until `quit`, end of input, or cancellation.
    pub async fn run<R, W>(
        &self,
        input: R,
        mut output: W,
        cancel: CancellationToken,
    ) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = input.lines();
        loop {
            let line = tokio::select! {
                _ = cancel.cancelled() => break,
                line = lines.next_line() => line?,
            };
            let Some(line) = line else {
                debug!("Console input closed");
                break;
            };
            if line.trim().is_empty() {
                continue;
            }
            let Some(cmd) = parse_command(&line) else {
                output.write_all(format!("unknown command; {HELP}\n").as_bytes()).await?;
                continue;
            };
            if cmd == ConsoleCommand::Quit {
                break;
            }
            let reply = self.execute(cmd).await;
            output.write_all(reply.as_bytes()).await?;
            output.flush().await?;
        }
        Ok(())
    }

    /// Apply one command and return the text to show the guest.
    pub async fn execute(&self, cmd: ConsoleCommand) -> String {
        let result = match cmd {
            ConsoleCommand::OpenBell => match self.session.open_bell().await {
                Ok(()) => self.session.state().await.map(|s| render_state(&s)),
                Err(e) => Err(e),
            },
            ConsoleCommand::CloseBell => self
                .session
                .close_bell()
                .await
                .map(|_| "bell closed\n".to_string()),
            ConsoleCommand::Dismiss(id) => self.session.close_toast(&id).await.map(|closed| {
                if closed {
                    format!("dismissed {id}\n")
                } else {
                    format!("no toast for {id}\n")
                }
            }),
            ConsoleCommand::Remove(id) => self.session.remove_from_bell(&id).await.map(|removed| {
                if removed {
                    format!("removed {id}\n")
                } else {
                    format!("{id} is not in the bell\n")
                }
            }),
            ConsoleCommand::Cancel { order_id, reason } => {
                return self.cancel(&order_id, &reason).await;
            }
            ConsoleCommand::State => self.session.state().await.map(|s| render_state(&s)),
            ConsoleCommand::Hide => {
                self.visibility.set_visible(false);
                Ok("polling paused\n".to_string())
            }
            ConsoleCommand::Show => {
                self.visibility.set_visible(true);
                Ok("polling resumed\n".to_string())
            }
            ConsoleCommand::Help | ConsoleCommand::Quit => Ok(format!("{HELP}\n")),
        };
        result.unwrap_or_else(|e| format!("error: {e}\n"))
    }

    async fn cancel(&self, order_id: &str, reason: &str) -> String {
        let original = match self.session.find_order(order_id).await {
            Ok(order) => order,
            Err(e) => return format!("error: {e}\n"),
        };
        match self.client.cancel_order(order_id, reason, original.as_ref()).await {
            Ok(_) => format!("cancel requested for {order_id}\n"),
            Err(e) => {
                warn!(order_id, error = %e, "Cancel request failed");
                format!("cancel failed: {e}\n")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::FeedPaths;
    use crate::orders::{Order, OrderSource};
    use crate::session::{NotificationService, NotificationSession};
    use crate::sound::Silent;
    use crate::status::OrderStatus;
    use crate::store::{MemoryBackend, NotificationStore};
    use std::sync::Arc;

    #[test]
    fn test_parse_command_verbs() {
        assert_eq!(parse_command("open"), Some(ConsoleCommand::OpenBell));
        assert_eq!(parse_command("  CLOSE "), Some(ConsoleCommand::CloseBell));
        assert_eq!(parse_command("dismiss O1"), Some(ConsoleCommand::Dismiss("O1".into())));
        assert_eq!(parse_command("rm O2"), Some(ConsoleCommand::Remove("O2".into())));
        assert_eq!(parse_command("quit"), Some(ConsoleCommand::Quit));
        assert_eq!(parse_command("dismiss"), None);
        assert_eq!(parse_command("dance"), None);
        assert_eq!(parse_command(""), None);
    }

    #[test]
    fn test_parse_cancel_reason() {
        assert_eq!(
            parse_command("cancel O3 changed my mind"),
            Some(ConsoleCommand::Cancel {
                order_id: "O3".into(),
                reason: "changed my mind".into()
            })
        );
        assert_eq!(
            parse_command("cancel O3"),
            Some(ConsoleCommand::Cancel {
                order_id: "O3".into(),
                reason: DEFAULT_CANCEL_REASON.into()
            })
        );
    }

    fn console() -> (Console, CancellationToken) {
        let cancel = CancellationToken::new();
        let store = NotificationStore::load(Box::new(MemoryBackend::new()));
        let session = NotificationSession::new("204", store, Arc::new(Silent));
        let (handle, _task) = NotificationService::spawn(session, cancel.clone());
        let client = FeedClient::new("http://127.0.0.1:9", FeedPaths::default()).unwrap();
        (Console::new(handle, client, PageVisibility::new()), cancel)
    }

    #[tokio::test]
    async fn test_console_drives_bell_and_visibility() {
        let (console, cancel) = console();
        console
            .session
            .submit_snapshot(
                OrderSource::Active,
                1,
                vec![Order {
                    id: "O1".into(),
                    room_number: "204".into(),
                    status: OrderStatus::Preparing,
                    items: vec![],
                    cancellation_reason: None,
                    source: OrderSource::Active,
                }],
            )
            .await
            .unwrap();

        let input: &[u8] = b"state\nopen\nhide\nbogus\nquit\nshow\n";
        let mut output = Vec::new();
        console.run(input, &mut output, cancel.clone()).await.unwrap();
        let text = String::from_utf8(output).unwrap();

        assert!(text.contains("room 204 | unread 1 | bell closed"));
        assert!(text.contains("room 204 | unread 0 | bell open"));
        assert!(text.contains("O1"));
        assert!(text.contains("polling paused"));
        assert!(text.contains("unknown command"));
        // Input after quit is not processed.
        assert!(!text.contains("polling resumed"));
        assert!(!console.visibility.is_visible());

        cancel.cancel();
    }

    #[tokio::test]
    async fn test_dismiss_unknown_toast_reports_it() {
        let (console, cancel) = console();
        let reply = console.execute(ConsoleCommand::Dismiss("nope".into())).await;
        assert_eq!(reply, "no toast for nope\n");
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_cancel_failure_is_reported_not_fatal() {
        let (console, cancel) = console();
        let reply = console
            .execute(ConsoleCommand::Cancel {
                order_id: "O9".into(),
                reason: "test".into(),
            })
            .await;
        assert!(reply.starts_with("cancel failed"));
        cancel.cancel();
    }

    #[test]
    fn test_describe_toast_event() {
        let order = Order {
            id: "O2".into(),
            room_number: "204".into(),
            status: OrderStatus::Cancelled,
            items: vec![],
            cancellation_reason: Some("Kitchen closed".into()),
            source: OrderSource::CancelledFeed,
        };
        let toast = crate::toast::Toast::for_order(&order);
        let line = describe_event(&NotificationEvent::ToastAdded { toast }).unwrap();
        assert!(line.contains("O2"));
        assert!(line.ends_with("- Kitchen closed"));
        assert!(describe_event(&NotificationEvent::ToastsCleared).is_none());
    }
}
