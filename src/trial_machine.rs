//! Round bookkeeping for a trial: walk a number of strides, prompt the subject,
//! record the answer, repeat.
//!
//! Transitions:
//!
//! | from        | event                          | guard                 | to                | actions         |
//! |-------------|--------------------------------|-----------------------|-------------------|-----------------|
//! | Walking(r)  | Tick                           | strides >= per round  | Prompting(r)      | Prompt          |
//! | Prompting(r)| Tick                           | waited >= timeout     | Prompting(r)      | Prompt (again)  |
//! | Prompting(r)| Response(v)                    | v valid, r+1 < rounds | Walking(r+1)      | Record          |
//! | Prompting(r)| Response(v)                    | v valid, last round   | Finished          | Record, Finish  |
//! | any         | Response(v)                    | otherwise             | unchanged         | Rejected        |

use serde::{Deserialize, Serialize};

use crate::config::TrialConfig;
use crate::trial::{TrialSpec, TrialType};

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TrialPhase {
    Walking { round: u32, since: f64 },
    Prompting { round: u32, since: f64 },
    Finished,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TrialEvent {
    /// `strides` counted since the current round started walking.
    Tick { now: f64, strides: usize },
    Response(f64),
}

#[derive(Clone, Debug, PartialEq)]
pub enum TrialAction {
    Prompt { round: u32, repeat: bool },
    Record(RoundResult),
    Rejected { value: f64, reason: String },
    Finish,
}

/// Second-price settlement of one Vickrey round.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuctionOutcome {
    pub bid: f64,
    pub clearing_price: f64,
    pub won: bool,
    /// The clearing price when won, otherwise zero.
    pub payment: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoundResult {
    pub round: u32,
    pub response: f64,
    pub prompted_at: f64,
    pub answered_at: f64,
    pub prompts: u32,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub auction: Option<AuctionOutcome>,
}

/// What gets written to `<stem>_responses.json`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrialResponses {
    pub trial: TrialSpec,
    pub complete: bool,
    pub rounds: Vec<RoundResult>,
}

pub struct TrialMachine {
    trial_type: TrialType,
    cfg: TrialConfig,
    phase: TrialPhase,
    results: Vec<RoundResult>,
    last_now: f64,
    first_prompt_at: f64,
    prompts: u32,
}

impl TrialMachine {
    pub fn new(trial_type: TrialType, cfg: &TrialConfig, start: f64) -> Self {
        let phase = if cfg.rounds == 0 {
            TrialPhase::Finished
        } else {
            TrialPhase::Walking {
                round: 0,
                since: start,
            }
        };
        Self {
            trial_type,
            cfg: cfg.clone(),
            phase,
            results: Vec::new(),
            last_now: start,
            first_prompt_at: start,
            prompts: 0,
        }
    }

    pub fn phase(&self) -> TrialPhase {
        self.phase
    }

    pub fn results(&self) -> &[RoundResult] {
        &self.results
    }

    pub fn is_finished(&self) -> bool {
        self.phase == TrialPhase::Finished
    }

    /// Start time of the walking stretch strides should be counted from.
    pub fn round_start(&self) -> Option<f64> {
        match self.phase {
            TrialPhase::Walking { since, .. } => Some(since),
            _ => None,
        }
    }

    pub fn clearing_price(&self, round: u32) -> Option<f64> {
        let prices = &self.cfg.clearing_prices;
        if prices.is_empty() {
            return None;
        }
        Some(prices[round as usize % prices.len()])
    }

    pub fn handle(&mut self, event: TrialEvent) -> Vec<TrialAction> {
        match (self.phase, event) {
            (TrialPhase::Walking { round, .. }, TrialEvent::Tick { now, strides }) => {
                self.last_now = now;
                if strides >= self.cfg.strides_per_round {
                    self.phase = TrialPhase::Prompting { round, since: now };
                    self.first_prompt_at = now;
                    self.prompts = 1;
                    log::info!("round {}: {} strides walked, prompting", round + 1, strides);
                    vec![TrialAction::Prompt { round, repeat: false }]
                } else {
                    Vec::new()
                }
            }
            (TrialPhase::Prompting { round, since }, TrialEvent::Tick { now, .. }) => {
                self.last_now = now;
                if now - since >= self.cfg.prompt_timeout_secs {
                    self.phase = TrialPhase::Prompting { round, since: now };
                    self.prompts += 1;
                    log::warn!("round {}: no response after {:.0}s, prompting again", round + 1, now - since);
                    vec![TrialAction::Prompt { round, repeat: true }]
                } else {
                    Vec::new()
                }
            }
            (TrialPhase::Prompting { round, .. }, TrialEvent::Response(value)) => {
                if let Err(reason) = self.check_response(value) {
                    log::warn!("round {}: rejected response {}: {}", round + 1, value, reason);
                    return vec![TrialAction::Rejected { value, reason }];
                }
                let result = RoundResult {
                    round,
                    response: value,
                    prompted_at: self.first_prompt_at,
                    answered_at: self.last_now,
                    prompts: self.prompts,
                    auction: self.settle(round, value),
                };
                log::info!("round {}: recorded {}", round + 1, value);
                self.results.push(result.clone());

                if round + 1 >= self.cfg.rounds {
                    self.phase = TrialPhase::Finished;
                    vec![TrialAction::Record(result), TrialAction::Finish]
                } else {
                    self.phase = TrialPhase::Walking {
                        round: round + 1,
                        since: self.last_now,
                    };
                    vec![TrialAction::Record(result)]
                }
            }
            (_, TrialEvent::Response(value)) => vec![TrialAction::Rejected {
                value,
                reason: "no prompt pending".into(),
            }],
            (TrialPhase::Finished, TrialEvent::Tick { now, .. }) => {
                self.last_now = now;
                Vec::new()
            }
        }
    }

    fn check_response(&self, value: f64) -> Result<(), String> {
        if !value.is_finite() {
            return Err("not a number".into());
        }
        match self.trial_type {
            TrialType::Vas if !(0.0..=100.0).contains(&value) => Err("VAS ratings run from 0 to 100".into()),
            TrialType::Vickrey if value < 0.0 => Err("bids cannot be negative".into()),
            TrialType::Jnd | TrialType::Pref if value != 1.0 && value != 2.0 => {
                Err("answer 1 or 2".into())
            }
            _ => Ok(()),
        }
    }

    fn settle(&self, round: u32, bid: f64) -> Option<AuctionOutcome> {
        if self.trial_type != TrialType::Vickrey {
            return None;
        }
        let clearing_price = self.clearing_price(round)?;
        let won = bid >= clearing_price;
        Some(AuctionOutcome {
            bid,
            clearing_price,
            won,
            payment: if won { clearing_price } else { 0.0 },
        })
    }

    pub fn responses(&self, trial: &TrialSpec) -> TrialResponses {
        TrialResponses {
            trial: trial.clone(),
            complete: self.is_finished(),
            rounds: self.results.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trial::{Condition, Description};

    fn cfg(rounds: u32) -> TrialConfig {
        TrialConfig {
            strides_per_round: 3,
            rounds,
            prompt_timeout_secs: 10.0,
            clearing_prices: vec![1.0, 2.0],
        }
    }

    fn tick(now: f64, strides: usize) -> TrialEvent {
        TrialEvent::Tick { now, strides }
    }

    #[test]
    fn test_walk_prompt_record_cycle() {
        let mut m = TrialMachine::new(TrialType::Vas, &cfg(2), 0.0);
        assert_eq!(m.round_start(), Some(0.0));
        assert!(m.handle(tick(1.0, 2)).is_empty());
        assert_eq!(m.handle(tick(2.0, 3)), vec![TrialAction::Prompt { round: 0, repeat: false }]);
        assert_eq!(m.round_start(), None);

        let actions = m.handle(TrialEvent::Response(55.0));
        assert!(matches!(&actions[..], [TrialAction::Record(r)] if r.round == 0 && r.response == 55.0));
        assert_eq!(m.phase(), TrialPhase::Walking { round: 1, since: 2.0 });

        m.handle(tick(5.0, 3));
        let actions = m.handle(TrialEvent::Response(0.0));
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[1], TrialAction::Finish);
        assert!(m.is_finished());
        assert_eq!(m.results().len(), 2);
    }

    #[test]
    fn test_prompt_timeout_repeats() {
        let mut m = TrialMachine::new(TrialType::Vas, &cfg(1), 0.0);
        m.handle(tick(1.0, 3));
        assert!(m.handle(tick(10.5, 0)).is_empty());
        assert_eq!(m.handle(tick(11.0, 0)), vec![TrialAction::Prompt { round: 0, repeat: true }]);
        assert!(m.handle(tick(20.0, 0)).is_empty());
        m.handle(tick(21.0, 0));

        let actions = m.handle(TrialEvent::Response(40.0));
        match &actions[0] {
            TrialAction::Record(r) => {
                assert_eq!(r.prompts, 3);
                assert_eq!(r.prompted_at, 1.0);
                assert_eq!(r.answered_at, 21.0);
            }
            other => panic!("expected record, got {other:?}"),
        }
    }

    #[test]
    fn test_out_of_range_responses_are_rejected() {
        let mut vas = TrialMachine::new(TrialType::Vas, &cfg(1), 0.0);
        assert!(matches!(vas.handle(TrialEvent::Response(50.0))[0], TrialAction::Rejected { .. }));
        vas.handle(tick(1.0, 3));
        assert!(matches!(vas.handle(TrialEvent::Response(100.5))[0], TrialAction::Rejected { .. }));
        assert!(matches!(vas.handle(TrialEvent::Response(f64::NAN))[0], TrialAction::Rejected { .. }));
        assert!(matches!(vas.handle(TrialEvent::Response(100.0))[0], TrialAction::Record(_)));

        let mut jnd = TrialMachine::new(TrialType::Jnd, &cfg(1), 0.0);
        jnd.handle(tick(1.0, 3));
        assert!(matches!(jnd.handle(TrialEvent::Response(3.0))[0], TrialAction::Rejected { .. }));
        assert!(matches!(jnd.handle(TrialEvent::Response(2.0))[0], TrialAction::Record(_)));

        let mut bid = TrialMachine::new(TrialType::Vickrey, &cfg(1), 0.0);
        bid.handle(tick(1.0, 3));
        assert!(matches!(bid.handle(TrialEvent::Response(-0.5))[0], TrialAction::Rejected { .. }));
    }

    #[test]
    fn test_vickrey_second_price_settlement() {
        let mut m = TrialMachine::new(TrialType::Vickrey, &cfg(3), 0.0);
        let mut t = 0.0;
        for bid in [1.5, 1.5, 1.0] {
            t += 1.0;
            m.handle(tick(t, 3));
            m.handle(TrialEvent::Response(bid));
        }
        let outcomes: Vec<AuctionOutcome> = m.results().iter().map(|r| r.auction.unwrap()).collect();
        // prices cycle 1.0, 2.0, 1.0
        assert!(outcomes[0].won);
        assert_eq!(outcomes[0].payment, 1.0);
        assert!(!outcomes[1].won);
        assert_eq!(outcomes[1].payment, 0.0);
        assert!(outcomes[2].won, "a bid equal to the price wins");
        assert!(m.is_finished());
    }

    #[test]
    fn test_responses_serialize() {
        let spec = TrialSpec::new("S01", TrialType::Vas, Condition::Low, Description::Main).unwrap();
        let mut m = TrialMachine::new(TrialType::Vas, &cfg(1), 0.0);
        m.handle(tick(1.0, 3));
        m.handle(TrialEvent::Response(12.5));
        let json = serde_json::to_string(&m.responses(&spec)).unwrap();
        assert!(json.contains("\"trial_type\":\"VAS\""));
        assert!(!json.contains("auction"));
        let back: TrialResponses = serde_json::from_str(&json).unwrap();
        assert!(back.complete);
        assert_eq!(back.rounds[0].response, 12.5);
    }

    #[test]
    fn test_zero_rounds_is_finished() {
        let m = TrialMachine::new(TrialType::Pref, &cfg(0), 0.0);
        assert!(m.is_finished());
    }
}
