//! Scriptable accrual source.
//!
//! Tests queue per-number replies up front; `check` serves them in order and
//! keeps repeating the last one once the script runs out. A number nobody
//! scripted reads as "not ready", which is what a real authority says about
//! an order it has not seen yet.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use tally_accrual::{AccrualCheck, AccrualError, AccrualReply, AccrualSource, AccrualStatus};

// ---------------------------------------------------------------------------
// ScriptedAccrual
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct ScriptedAccrual {
    scripts: Mutex<HashMap<String, Script>>,
}

#[derive(Default)]
struct Script {
    replies: Vec<Result<AccrualCheck, AccrualError>>,
    calls: usize,
}

impl ScriptedAccrual {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a raw reply for `number`.
    pub fn push(&self, number: &str, reply: Result<AccrualCheck, AccrualError>) {
        self.lock()
            .entry(number.to_string())
            .or_default()
            .replies
            .push(reply);
    }

    /// Queue a PROCESSED reply awarding `accrual_centi`.
    pub fn push_processed(&self, number: &str, accrual_centi: i64) {
        self.push(
            number,
            Ok(AccrualCheck::Ready(AccrualReply {
                order: number.to_string(),
                status: AccrualStatus::Processed,
                accrual_centi: Some(accrual_centi),
            })),
        );
    }

    /// Queue an INVALID reply.
    pub fn push_invalid(&self, number: &str) {
        self.push(
            number,
            Ok(AccrualCheck::Ready(AccrualReply {
                order: number.to_string(),
                status: AccrualStatus::Invalid,
                accrual_centi: None,
            })),
        );
    }

    /// Queue a non-terminal definitive reply (REGISTERED or PROCESSING),
    /// which carries no accrual.
    pub fn push_status(&self, number: &str, status: AccrualStatus) {
        self.push(
            number,
            Ok(AccrualCheck::Ready(AccrualReply {
                order: number.to_string(),
                status,
                accrual_centi: None,
            })),
        );
    }

    /// Queue a "try later" reply, as a 429 or 204 would produce.
    pub fn push_not_ready(&self, number: &str) {
        self.push(number, Ok(AccrualCheck::NotReady));
    }

    /// Queue a transport-level failure.
    pub fn push_error(&self, number: &str, error: AccrualError) {
        self.push(number, Err(error));
    }

    /// How many times `check` has been called for `number`.
    pub fn calls(&self, number: &str) -> usize {
        self.lock().get(number).map(|s| s.calls).unwrap_or(0)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Script>> {
        self.scripts.lock().expect("scripted accrual mutex poisoned")
    }
}

#[async_trait]
impl AccrualSource for ScriptedAccrual {
    async fn check(&self, order_number: &str) -> Result<AccrualCheck, AccrualError> {
        let mut scripts = self.lock();
        let script = scripts.entry(order_number.to_string()).or_default();
        let index = script.calls.min(script.replies.len().saturating_sub(1));
        script.calls += 1;
        match script.replies.get(index) {
            Some(reply) => reply.clone(),
            None => Ok(AccrualCheck::NotReady),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replies_served_in_order_then_last_repeats() {
        let source = ScriptedAccrual::new();
        source.push_not_ready("79927398713");
        source.push_processed("79927398713", 50_000);

        assert_eq!(
            source.check("79927398713").await.unwrap(),
            AccrualCheck::NotReady
        );
        let settled = AccrualCheck::Ready(AccrualReply {
            order: "79927398713".to_string(),
            status: AccrualStatus::Processed,
            accrual_centi: Some(50_000),
        });
        assert_eq!(source.check("79927398713").await.unwrap(), settled);
        // Script exhausted: the last reply is sticky.
        assert_eq!(source.check("79927398713").await.unwrap(), settled);
        assert_eq!(source.calls("79927398713"), 3);
    }

    #[tokio::test]
    async fn unscripted_number_reads_not_ready() {
        let source = ScriptedAccrual::new();
        assert_eq!(source.check("1001").await.unwrap(), AccrualCheck::NotReady);
        assert_eq!(source.calls("1001"), 1);
        assert_eq!(source.calls("never-asked"), 0);
    }

    #[tokio::test]
    async fn errors_replay_like_replies() {
        let source = ScriptedAccrual::new();
        source.push_error("1001", AccrualError::Transport("connection refused".into()));
        source.push_invalid("1001");

        assert_eq!(
            source.check("1001").await.unwrap_err(),
            AccrualError::Transport("connection refused".into())
        );
        let reply = source.check("1001").await.unwrap();
        match reply {
            AccrualCheck::Ready(reply) => assert_eq!(reply.status, AccrualStatus::Invalid),
            AccrualCheck::NotReady => panic!("expected the scripted INVALID reply"),
        }
    }
}
