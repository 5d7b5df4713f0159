//! Keyframe (IDR) request lifecycle.
//!
//! A request is identified by a short random code that the downstream
//! controller de-duplicates on. The same code is attached to the next
//! `idr_max_messages` outgoing messages so a single lost datagram does not
//! swallow the request.

use rand::Rng;

/// Length of a keyframe request code.
pub const CODE_LEN: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyframeState {
    Idle,
    /// `remaining` is always > 0 in this state.
    Pending { code: String, remaining: u32 },
}

#[derive(Debug)]
pub struct KeyframeRequests {
    max_messages: u32,
    state: KeyframeState,
}

impl KeyframeRequests {
    pub fn new(max_messages: u32) -> Self {
        Self {
            max_messages,
            state: KeyframeState::Idle,
        }
    }

    pub fn state(&self) -> &KeyframeState {
        &self.state
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, KeyframeState::Pending { .. })
    }

    /// Start a new request, replacing any outstanding one.
    pub fn request(&mut self) {
        if self.max_messages == 0 {
            // Expires before it can be attached to anything.
            self.state = KeyframeState::Idle;
            return;
        }
        let code = generate_code();
        tracing::debug!(code = %code, messages = self.max_messages, "keyframe requested");
        self.state = KeyframeState::Pending {
            code,
            remaining: self.max_messages,
        };
    }

    /// Take the code for the message about to be emitted, if any.
    pub fn consume(&mut self) -> Option<String> {
        match &mut self.state {
            KeyframeState::Idle => None,
            KeyframeState::Pending { code, remaining } => {
                let out = code.clone();
                *remaining -= 1;
                if *remaining == 0 {
                    self.state = KeyframeState::Idle;
                }
                Some(out)
            }
        }
    }
}

/// Random lowercase ASCII token.
fn generate_code() -> String {
    let mut rng = rand::rng();
    (0..CODE_LEN)
        .map(|_| rng.random_range(b'a'..=b'z') as char)
        .collect()
}
