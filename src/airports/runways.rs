use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

use crate::weather::normalize_station;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunwaySide {
    None,
    Left,
    Right,
    Center,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunwayInfo {
    pub designator: String,
    pub number: u8,
    pub side: RunwaySide,
    pub magnetic_heading_deg: i32,
}

/// Parsed runway designator such as `28L` or `7`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Designator {
    pub number: u8,
    pub side: RunwaySide,
}

impl Designator {
    /// Accepts `1`..`36` (leading zero optional) plus an optional L/R/C, any case.
    pub fn parse(input: &str) -> Option<Self> {
        let s = input.trim().to_ascii_uppercase();
        let (digits, side) = match s.chars().last()? {
            'L' => (&s[..s.len() - 1], RunwaySide::Left),
            'R' => (&s[..s.len() - 1], RunwaySide::Right),
            'C' => (&s[..s.len() - 1], RunwaySide::Center),
            _ => (s.as_str(), RunwaySide::None),
        };

        if digits.is_empty() || digits.len() > 2 || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let number: u8 = digits.parse().ok()?;
        if !(1..=36).contains(&number) {
            return None;
        }
        Some(Self { number, side })
    }
}

impl fmt::Display for Designator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let side = match self.side {
            RunwaySide::None => "",
            RunwaySide::Left => "L",
            RunwaySide::Right => "R",
            RunwaySide::Center => "C",
        };
        write!(f, "{:02}{}", self.number, side)
    }
}

/// Runway headings by station.
pub trait RunwayCatalog: Send + Sync {
    /// Heading of the runway matching `designator`. Without a side the first
    /// runway with that number wins.
    fn magnetic_heading(&self, station_id: &str, designator: &Designator) -> Option<i32>;

    fn all_runways(&self, station_id: &str) -> Option<Vec<RunwayInfo>>;
}

pub struct InMemoryRunwayCatalog {
    airports: HashMap<String, Vec<RunwayInfo>>,
}

fn runway(designator: &str, number: u8, side: RunwaySide, heading: i32) -> RunwayInfo {
    RunwayInfo {
        designator: designator.to_string(),
        number,
        side,
        magnetic_heading_deg: heading,
    }
}

impl InMemoryRunwayCatalog {
    pub fn new(airports: impl IntoIterator<Item = (String, Vec<RunwayInfo>)>) -> Self {
        Self {
            airports: airports
                .into_iter()
                .map(|(icao, runways)| (normalize_station(&icao), runways))
                .collect(),
        }
    }

    pub fn builtin() -> Self {
        use RunwaySide::{Left, Right};

        let ksfo = vec![
            runway("01L", 1, Left, 10),
            runway("01R", 1, Right, 10),
            runway("19L", 19, Left, 190),
            runway("19R", 19, Right, 190),
            runway("28L", 28, Left, 280),
            runway("28R", 28, Right, 280),
            runway("10L", 10, Left, 100),
            runway("10R", 10, Right, 100),
        ];
        let kden = vec![
            runway("16L", 16, Left, 164),
            runway("16R", 16, Right, 164),
            runway("17L", 17, Left, 174),
            runway("17R", 17, Right, 174),
            runway("34L", 34, Left, 344),
            runway("34R", 34, Right, 344),
            runway("35L", 35, Left, 354),
            runway("35R", 35, Right, 354),
            runway("07", 7, RunwaySide::None, 74),
            runway("25", 25, RunwaySide::None, 254),
        ];

        Self::new([("KSFO".to_string(), ksfo), ("KDEN".to_string(), kden)])
    }
}

impl RunwayCatalog for InMemoryRunwayCatalog {
    fn magnetic_heading(&self, station_id: &str, designator: &Designator) -> Option<i32> {
        self.airports
            .get(&normalize_station(station_id))?
            .iter()
            .find(|r| {
                r.number == designator.number
                    && (designator.side == RunwaySide::None || r.side == designator.side)
            })
            .map(|r| r.magnetic_heading_deg)
    }

    fn all_runways(&self, station_id: &str) -> Option<Vec<RunwayInfo>> {
        self.airports.get(&normalize_station(station_id)).cloned()
    }
}
