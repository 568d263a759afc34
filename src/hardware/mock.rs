//! Mock Hardware Implementations
//!
//! Simulated apparatus boards for testing without physical hardware. Each
//! simulator is a [`Responder`] for a [`MockTransport`] and answers the way the
//! real firmware does, with hooks to inject faults.
//!
//! # Available Mocks
//!
//! - `SimSwitchBoard` - echo-acknowledging switch board with scripted rain
//! - `SimOutletBox` - banner, confirm prompt and status table
//! - `SimRadiometer` - status reply and ASCII dump
//!
//! # Example
//!
//! ```rust
//! use laser_daq::adapters::Journal;
//! use laser_daq::hardware::mock::SimSwitchBoard;
//!
//! let journal = Journal::new();
//! let link = SimSwitchBoard::new().with_rain("DDW").into_transport(&journal);
//! ```

use crate::adapters::{Journal, MockTransport, Responder};
use std::collections::{HashMap, HashSet, VecDeque};

/// Transport label of the switch board simulator.
pub const SWITCH_LINK: &str = "switch";
/// Transport label of the outlet box simulator.
pub const OUTLET_LINK: &str = "outlet";
/// Transport label of the radiometer simulator.
pub const RADIOMETER_LINK: &str = "radiometer";

/// Power-up banner of the outlet box.
pub const OUTLET_BANNER: &str = "\r\nRPC-2 Series\r\n(C) 1997 by BayTech\r\nF2.07\r\n";

// =============================================================================
// SimSwitchBoard
// =============================================================================

/// Simulated switch/sensor board.
///
/// Echoes `OUT`/`RMON` commands, answers sensor queries with fixed readings
/// and plays back a rain sequence, repeating its last code once exhausted.
pub struct SimSwitchBoard {
    version: String,
    readings: HashMap<String, String>,
    rain: VecDeque<char>,
    last_rain: char,
    overrides: HashMap<String, VecDeque<String>>,
}

impl SimSwitchBoard {
    /// Board reporting dry weather and plausible readings.
    pub fn new() -> Self {
        let readings = [
            ("PRESS", "867.3"),
            ("TEMP", "281.4"),
            ("HUMID", "41.0"),
            ("SUPPLY", "12.6"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        Self {
            version: "2.04".to_string(),
            readings,
            rain: VecDeque::new(),
            last_rain: 'D',
            overrides: HashMap::new(),
        }
    }

    /// Rain codes returned by successive `RAIN` queries.
    pub fn with_rain(mut self, codes: &str) -> Self {
        self.rain = codes.chars().collect();
        self
    }

    /// Replaces the reply to the next occurrence of `command`.
    ///
    /// Several overrides for one command are used in order.
    pub fn with_reply(mut self, command: &str, reply: &str) -> Self {
        self.overrides
            .entry(command.to_string())
            .or_default()
            .push_back(reply.to_string());
        self
    }

    /// Wraps the simulator in a transport journaling into `journal`.
    pub fn into_transport(self, journal: &Journal) -> MockTransport {
        MockTransport::new(SWITCH_LINK, self).with_journal(journal.clone())
    }
}

impl Default for SimSwitchBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl Responder for SimSwitchBoard {
    fn respond(&mut self, line: &str) -> Option<String> {
        if let Some(reply) = self.overrides.get_mut(line).and_then(VecDeque::pop_front) {
            return Some(reply);
        }

        let name = line.split_whitespace().next().unwrap_or("");
        match name {
            "ECHO" | "OUT" | "RMON" => Some(format!("{}\r\n", line)),
            "VER" => Some(format!("VER {}\r\n", self.version)),
            "RAIN" => {
                if let Some(code) = self.rain.pop_front() {
                    self.last_rain = code;
                }
                Some(format!("RAIN {}\r\n", self.last_rain))
            }
            _ => self
                .readings
                .get(name)
                .map(|value| format!("{} {}\r\n", name, value)),
        }
    }
}

// =============================================================================
// SimOutletBox
// =============================================================================

/// Simulated relay outlet box with eight outlets, all initially off.
pub struct SimOutletBox {
    outlets: [bool; 8],
    selected: Option<(usize, bool)>,
    stuck: HashSet<u8>,
}

impl SimOutletBox {
    /// Box with all outlets working.
    pub fn new() -> Self {
        Self {
            outlets: [false; 8],
            selected: None,
            stuck: HashSet::new(),
        }
    }

    /// Outlet whose relay never changes state.
    pub fn with_stuck_outlet(mut self, outlet: u8) -> Self {
        self.stuck.insert(outlet);
        self
    }

    /// Wraps the simulator in a transport that starts with the banner pending.
    pub fn into_transport(self, journal: &Journal) -> MockTransport {
        MockTransport::new(OUTLET_LINK, self)
            .with_journal(journal.clone())
            .with_pending(OUTLET_BANNER)
    }

    fn status_table(&self) -> String {
        let mut table = String::from("\r\nCircuit Breaker: On \r\n\r\n");
        for (i, on) in self.outlets.iter().enumerate() {
            table.push_str(&format!(
                "{})...Outlet {}  : {} \r\n",
                i + 1,
                i + 1,
                if *on { "On" } else { "Off" }
            ));
        }
        table
    }
}

impl Default for SimOutletBox {
    fn default() -> Self {
        Self::new()
    }
}

impl Responder for SimOutletBox {
    fn respond(&mut self, line: &str) -> Option<String> {
        let mut tokens = line.split_whitespace();
        match (tokens.next(), tokens.next().and_then(|n| n.parse::<u8>().ok())) {
            (Some(verb @ ("ON" | "OFF")), Some(n)) if (1..=8).contains(&n) => {
                let on = verb == "ON";
                self.selected = Some((usize::from(n - 1), on));
                Some(format!(
                    "\r\nTurn {} Outlet {} (Y/N)? ",
                    if on { "On" } else { "Off" },
                    n
                ))
            }
            (Some("Y"), None) => {
                if let Some((index, on)) = self.selected.take() {
                    let outlet = (index + 1) as u8;
                    if !self.stuck.contains(&outlet) {
                        self.outlets[index] = on;
                    }
                }
                Some(self.status_table())
            }
            _ => Some("\r\nInput error\r\n".to_string()),
        }
    }
}

// =============================================================================
// SimRadiometer
// =============================================================================

/// Simulated radiometer.
pub struct SimRadiometer {
    status: String,
    dump: String,
}

impl SimRadiometer {
    /// Radiometer reporting status 0 and dumping `dump` once in AD mode.
    pub fn new(dump: &str) -> Self {
        Self {
            status: "0".to_string(),
            dump: dump.to_string(),
        }
    }

    /// Reply to the `ST` query.
    pub fn with_status(mut self, status: &str) -> Self {
        self.status = status.to_string();
        self
    }

    /// Wraps the simulator in a transport journaling into `journal`.
    pub fn into_transport(self, journal: &Journal) -> MockTransport {
        MockTransport::new(RADIOMETER_LINK, self).with_journal(journal.clone())
    }
}

impl Responder for SimRadiometer {
    fn respond(&mut self, line: &str) -> Option<String> {
        match line {
            "ST" => Some(format!("{}\r", self.status)),
            "AD" => Some(std::mem::take(&mut self.dump)),
            _ => None,
        }
    }
}
