//! # LogWriter: simple event printer.
//!
//! Prints incoming [`Event`]s to stdout. Meant for demos and debugging.
//!
//! ## Example output
//! ```text
//! [instance] web.0 down -> starting (start)
//! [action] web.0.start node=A
//! [instance] web.0 starting -> up (mark_up)
//! [service] web starting -> up (mark_all_up)
//! [scheduled] web.0 monitor in 10000ms
//! [shutdown-requested]
//! [all-stopped-within-grace]
//! ```

use async_trait::async_trait;

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Debug, Default)]
pub struct LogWriter;

impl LogWriter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn opt(v: &Option<std::sync::Arc<str>>) -> &str {
    v.as_deref().unwrap_or("-")
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let from = e.from.unwrap_or("-");
        let to = e.to.unwrap_or("-");
        match e.kind {
            EventKind::InstanceTransition => {
                println!("[instance] {} {from} -> {to} ({})", opt(&e.instance), opt(&e.reason));
            }
            EventKind::ServiceTransition => {
                println!("[service] {} {from} -> {to} ({})", opt(&e.service), opt(&e.reason));
            }
            EventKind::ActionDispatched => {
                println!("[action] {} node={}", opt(&e.action), opt(&e.node));
            }
            EventKind::ActionCompleted => {
                println!("[complete] {} exit={:?}", opt(&e.action), e.exit_status);
            }
            EventKind::ActionFailStart => {
                println!("[failstart] {} reason={}", opt(&e.action), opt(&e.reason));
            }
            EventKind::MonitorTimeout => {
                println!("[monitor-timeout] {} timeout={:?}ms", opt(&e.instance), e.timeout_ms);
            }
            EventKind::MonitorOverlap => {
                println!("[monitor-overlap] {} {}", opt(&e.instance), opt(&e.reason));
            }
            EventKind::StaleOutcome => {
                println!("[stale] {} {}", opt(&e.instance), opt(&e.reason));
            }
            EventKind::Scheduled => {
                println!(
                    "[scheduled] {} {} in {}ms",
                    opt(&e.instance),
                    opt(&e.reason),
                    e.delay_ms.unwrap_or_default()
                );
            }
            EventKind::ServiceAdded => println!("[added] {}", opt(&e.service)),
            EventKind::ServiceRemoved => println!("[removed] {}", opt(&e.service)),
            EventKind::Reconfigured => {
                println!("[reconfigured] {} mode={}", opt(&e.service), opt(&e.reason));
            }
            EventKind::ShutdownRequested => println!("[shutdown-requested]"),
            EventKind::AllStoppedWithin => println!("[all-stopped-within-grace]"),
            EventKind::GraceExceeded => println!("[grace-exceeded] {}", opt(&e.reason)),
            EventKind::HandlerFailed => {
                println!("[handler-failed] {} {}", opt(&e.service), opt(&e.reason));
            }
            EventKind::SubscriberOverflow => println!("[subscriber-overflow] {}", opt(&e.reason)),
            EventKind::SubscriberPanicked => println!("[subscriber-panicked] {}", opt(&e.reason)),
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
