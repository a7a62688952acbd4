/**
 * RAII guard returned by `flare::init()`.
 *
 * Holds a `Client` handle and flushes it when dropped, so reports captured
 * just before the process exits still reach the collector (or the offline
 * queue):
 *
 * ```ignore
 * fn main() {
 *     let _guard = flare::init(options).unwrap();
 *     // ... application logic ...
 * }   // <-- _guard dropped here, triggering flush()
 * ```
 *
 * If the flush times out the guard logs a warning and lets the process
 * continue. Delivery is best-effort.
 */
use tracing::warn;

use crate::client::Client;

pub struct Guard {
    client: Client,
}

impl Guard {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

impl Drop for Guard {
    fn drop(&mut self) {
        if !self.client.flush() {
            warn!("Flush timed out, some reports may not have been sent");
        }
    }
}
