//! Coordinator task: serves radio events, operator lines and the poll tick.

use embassy_futures::select::{Either3, select3};
use embassy_time::{Duration, Ticker};

use crate::coordinator::Coordinator;

use super::radio::CoordinatorRadio;
use super::types::OperatorQueueReceiver;

/// Run the coordinator forever.
///
/// Radio events are handled one at a time in arrival order. Operator replies go to
/// stdout.
pub async fn coordinator_task(coordinator: &Coordinator<CoordinatorRadio<'_>>, operator_rx: OperatorQueueReceiver, poll_interval: Duration) {
    let mut poll = Ticker::every(poll_interval);
    log::info!("Coordinator listening with {} slots", coordinator.slots().capacity());

    loop {
        let next = select3(coordinator.link().next_event(), operator_rx.receive(), poll.next()).await;
        match next {
            Either3::First(event) => coordinator.handle_event(event).await,
            Either3::Second(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                let reply = coordinator.execute_line(&line).await;
                println!("{}", reply);
            }
            Either3::Third(()) => coordinator.poll(),
        }
    }
}
