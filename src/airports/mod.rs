pub mod runways;

use std::collections::HashMap;

use serde::Serialize;

use crate::error::SearchError;
use crate::weather::normalize_station;

const MAX_PAGE_SIZE: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Airport {
    pub icao: String,
    pub iata: Option<String>,
    pub name: String,
    pub city: String,
    pub region: String,
    /// Field elevation, feet MSL.
    pub elevation_ft: i32,
}

/// One page of airport search results.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchPage {
    pub items: Vec<Airport>,
    pub page: usize,
    pub page_size: usize,
    /// Matches across all pages.
    pub total: usize,
}

/// Station metadata lookup. Only elevation is needed for conditions.
pub trait AirportCatalog: Send + Sync {
    fn elevation_ft(&self, station_id: &str) -> Option<i32>;

    fn get(&self, station_id: &str) -> Option<Airport>;

    /// Every match for `query`, best first. Empty for a blank query.
    fn ranked(&self, query: &str) -> Vec<Airport>;

    /// Best matches first; empty for a blank query. `limit` is clamped to 1..=50.
    fn search(&self, query: &str, limit: usize) -> Vec<Airport> {
        let mut hits = self.ranked(query);
        hits.truncate(limit.clamp(1, MAX_PAGE_SIZE));
        hits
    }

    /// Page `page` (1-based) of `take` results. Unlike `search`, bad arguments
    /// are rejected rather than clamped. A page past the end is empty but still
    /// reports the total.
    fn search_page(&self, query: &str, page: usize, take: usize) -> Result<SearchPage, SearchError> {
        if query.trim().is_empty() {
            return Err(SearchError::MissingQuery);
        }
        if !(1..=MAX_PAGE_SIZE).contains(&take) {
            return Err(SearchError::InvalidTake(take));
        }
        if page == 0 {
            return Err(SearchError::InvalidPage);
        }

        let hits = self.ranked(query);
        let total = hits.len();
        let items = hits
            .into_iter()
            .skip((page - 1).saturating_mul(take))
            .take(take)
            .collect();

        Ok(SearchPage {
            items,
            page,
            page_size: take,
            total,
        })
    }
}

/// Built-in airport table, keyed by ICAO id.
pub struct InMemoryAirportCatalog {
    airports: HashMap<String, Airport>,
}

// icao, iata, name, city, region, elevation
const BUILTIN_AIRPORTS: &[(&str, &str, &str, &str, &str, i32)] = &[
    ("KSEA", "SEA", "Seattle-Tacoma International", "Seattle", "WA", 433),
    ("KBFI", "BFI", "Boeing Field/King County International", "Seattle", "WA", 21),
    ("KPAE", "PAE", "Paine Field", "Everett", "WA", 606),
    ("KSFO", "SFO", "San Francisco International", "San Francisco", "CA", 13),
    ("KOAK", "OAK", "Oakland International", "Oakland", "CA", 9),
    ("KSJC", "SJC", "San Jose Mineta International", "San Jose", "CA", 62),
    ("KLAX", "LAX", "Los Angeles International", "Los Angeles", "CA", 125),
    ("KSAN", "SAN", "San Diego International", "San Diego", "CA", 17),
    ("KBUR", "BUR", "Hollywood Burbank", "Burbank", "CA", 778),
    ("KSNA", "SNA", "John Wayne", "Santa Ana", "CA", 56),
    ("KDEN", "DEN", "Denver International", "Denver", "CO", 5434),
    ("KABQ", "ABQ", "Albuquerque International Sunport", "Albuquerque", "NM", 5355),
    ("KASE", "ASE", "Aspen-Pitkin County", "Aspen", "CO", 7820),
    ("KPHX", "PHX", "Phoenix Sky Harbor International", "Phoenix", "AZ", 1135),
    ("KLAS", "LAS", "Harry Reid International", "Las Vegas", "NV", 2181),
    ("KDFW", "DFW", "Dallas/Fort Worth International", "Dallas", "TX", 607),
    ("KORD", "ORD", "Chicago O'Hare International", "Chicago", "IL", 672),
    ("KMSP", "MSP", "Minneapolis-St Paul International", "Minneapolis", "MN", 841),
    ("KBOS", "BOS", "Boston Logan International", "Boston", "MA", 20),
    ("KJFK", "JFK", "John F Kennedy International", "New York", "NY", 13),
    ("KEWR", "EWR", "Newark Liberty International", "Newark", "NJ", 18),
    ("KDCA", "DCA", "Ronald Reagan Washington National", "Arlington", "VA", 15),
    ("KBWI", "BWI", "Baltimore/Washington International", "Baltimore", "MD", 146),
    ("KMIA", "MIA", "Miami International", "Miami", "FL", 8),
    ("KATL", "ATL", "Hartsfield-Jackson Atlanta International", "Atlanta", "GA", 1026),
];

impl InMemoryAirportCatalog {
    pub fn new(airports: impl IntoIterator<Item = Airport>) -> Self {
        let airports = airports
            .into_iter()
            .map(|a| (normalize_station(&a.icao), a))
            .collect();
        Self { airports }
    }

    pub fn builtin() -> Self {
        Self::new(BUILTIN_AIRPORTS.iter().map(
            |&(icao, iata, name, city, region, elevation_ft)| Airport {
                icao: icao.to_string(),
                iata: Some(iata.to_string()),
                name: name.to_string(),
                city: city.to_string(),
                region: region.to_string(),
                elevation_ft,
            },
        ))
    }

    pub fn len(&self) -> usize {
        self.airports.len()
    }
}

impl AirportCatalog for InMemoryAirportCatalog {
    fn elevation_ft(&self, station_id: &str) -> Option<i32> {
        self.airports
            .get(&normalize_station(station_id))
            .map(|a| a.elevation_ft)
    }

    fn get(&self, station_id: &str) -> Option<Airport> {
        self.airports.get(&normalize_station(station_id)).cloned()
    }

    fn ranked(&self, query: &str) -> Vec<Airport> {
        let q = query.trim().to_uppercase();
        if q.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<(u32, &Airport)> = self
            .airports
            .values()
            .filter_map(|a| match match_score(a, &q) {
                0 => None,
                s => Some((s, a)),
            })
            .collect();

        scored.sort_by(|(sa, a), (sb, b)| sb.cmp(sa).then_with(|| a.icao.cmp(&b.icao)));
        scored.into_iter().map(|(_, a)| a.clone()).collect()
    }
}

/// Relevance of `airport` for an upper-cased query; 0 means no match.
fn match_score(airport: &Airport, q: &str) -> u32 {
    let name = airport.name.to_uppercase();
    let iata = airport.iata.as_deref().unwrap_or("");

    if airport.icao == q {
        100
    } else if !iata.is_empty() && iata == q {
        90
    } else if name.starts_with(q) {
        80
    } else if name.contains(q) {
        60
    } else if !iata.is_empty() && iata.starts_with(q) {
        50
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn icaos(results: &[Airport]) -> Vec<&str> {
        results.iter().map(|a| a.icao.as_str()).collect()
    }

    #[test]
    fn test_builtin_elevations() {
        let catalog = InMemoryAirportCatalog::builtin();
        assert_eq!(catalog.len(), 25);
        assert_eq!(catalog.elevation_ft("KSFO"), Some(13));
        assert_eq!(catalog.elevation_ft(" kden "), Some(5434));
        assert_eq!(catalog.elevation_ft("KASE"), Some(7820));
        assert_eq!(catalog.elevation_ft("KXYZ"), None);
        assert_eq!(catalog.elevation_ft(""), None);
    }

    #[test]
    fn test_get_returns_metadata() {
        let catalog = InMemoryAirportCatalog::builtin();
        let sea = catalog.get("ksea").unwrap();
        assert_eq!(sea.iata.as_deref(), Some("SEA"));
        assert_eq!(sea.city, "Seattle");
        assert_eq!(sea.region, "WA");
    }

    #[test]
    fn test_search_exact_codes_rank_first() {
        let catalog = InMemoryAirportCatalog::builtin();
        assert_eq!(icaos(&catalog.search("ksfo", 10)), vec!["KSFO"]);
        assert_eq!(icaos(&catalog.search("sfo", 10))[0], "KSFO");
        assert_eq!(icaos(&catalog.search("LAX", 1)), vec!["KLAX"]);
    }

    #[test]
    fn test_search_name_prefix_beats_contains() {
        let catalog = InMemoryAirportCatalog::builtin();
        // Exact IATA for KSAN, then the two other "San ..." names
        let results = catalog.search("san ", 10);
        assert_eq!(icaos(&results), vec!["KSAN", "KSFO", "KSJC"]);

        // Prefix hits first, then contains hits, each group by ICAO
        let results = catalog.search("international", 50);
        assert!(results.len() > 10);
        let icaos = icaos(&results);
        let mut sorted = icaos.clone();
        sorted.sort();
        assert_eq!(icaos, sorted);
    }

    #[test]
    fn test_search_iata_prefix_is_weakest() {
        let catalog = InMemoryAirportCatalog::builtin();
        // "DC" matches only KDCA's IATA prefix
        assert_eq!(icaos(&catalog.search("dc", 10)), vec!["KDCA"]);
    }

    #[test]
    fn test_search_blank_and_limits() {
        let catalog = InMemoryAirportCatalog::builtin();
        assert!(catalog.search("   ", 10).is_empty());
        assert!(catalog.search("zzzz", 10).is_empty());
        assert_eq!(catalog.search("international", 0).len(), 1);
        assert_eq!(catalog.search("international", 3).len(), 3);
    }

    #[test]
    fn test_paged_search_walks_results() {
        let catalog = InMemoryAirportCatalog::builtin();
        let all = catalog.ranked("a");
        assert!(all.len() > 10);

        let first = catalog.search_page("a", 1, 5).unwrap();
        let second = catalog.search_page("a", 2, 5).unwrap();
        assert_eq!(first.page, 1);
        assert_eq!(second.page, 2);
        assert_eq!(second.page_size, 5);
        assert_eq!(first.total, all.len());
        assert_eq!(second.total, all.len());
        assert_eq!(first.items, all[..5].to_vec());
        assert_eq!(second.items, all[5..10].to_vec());
    }

    #[test]
    fn test_paged_search_past_the_end() {
        let catalog = InMemoryAirportCatalog::builtin();
        let page = catalog.search_page("ksfo", 100, 10).unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.page, 100);
        assert_eq!(page.total, 1);
    }

    #[test]
    fn test_paged_search_rejects_bad_arguments() {
        let catalog = InMemoryAirportCatalog::builtin();
        assert_eq!(catalog.search_page("test", 1, 0), Err(SearchError::InvalidTake(0)));
        assert_eq!(catalog.search_page("test", 1, 51), Err(SearchError::InvalidTake(51)));
        assert_eq!(catalog.search_page("test", 0, 10), Err(SearchError::InvalidPage));
        assert_eq!(catalog.search_page("  ", 1, 10), Err(SearchError::MissingQuery));
        assert!(catalog.search_page("sfo", 1, 50).is_ok());
    }

    #[test]
    fn test_paged_search_serializes_camel_case() {
        let catalog = InMemoryAirportCatalog::builtin();
        let json = serde_json::to_value(catalog.search_page("sfo", 1, 1).unwrap()).unwrap();
        assert_eq!(json["pageSize"], 1);
        assert_eq!(json["total"], 1);
        assert_eq!(json["items"][0]["icao"], "KSFO");
    }

    #[test]
    fn test_custom_catalog_normalizes_keys() {
        let catalog = InMemoryAirportCatalog::new(vec![Airport {
            icao: "k0s9".into(),
            iata: None,
            name: "Jefferson County International".into(),
            city: "Port Townsend".into(),
            region: "WA".into(),
            elevation_ft: 110,
        }]);
        assert_eq!(catalog.elevation_ft("K0S9"), Some(110));
        assert_eq!(catalog.search("jefferson", 5).len(), 1);
    }
}
