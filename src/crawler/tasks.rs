//! Extraction task building

use crate::browser::DiscoveredPlace;
use crate::geo::place_id_from_href;
use crate::storage::{PlaceRef, Storage};
use std::collections::HashSet;

/// Where the places of a tile belong
#[derive(Debug, Clone, PartialEq)]
pub struct TileScope {
    pub run_id: String,
    pub city: String,
    pub query: String,
    pub tile_index: u32,
}

/// One place to extract
#[derive(Debug, Clone, PartialEq)]
pub struct PlaceTask {
    pub place: PlaceRef,
}

/// Counts from task building, for the tile log line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskBuildStats {
    pub unparsed: usize,
    pub duplicates: usize,
    pub already_done: usize,
}

/// Builds one task per discovered place that still needs work
///
/// Places whose href carries no coordinates are skipped, repeated ids within the tile
/// collapse to the first card, and ids with a successful record are left alone.
pub fn build_place_tasks(
    discovered: &[DiscoveredPlace],
    scope: &TileScope,
    storage: &dyn Storage,
) -> crate::Result<(Vec<PlaceTask>, TaskBuildStats)> {
    let mut stats = TaskBuildStats::default();
    let mut seen = HashSet::new();
    let mut tasks = Vec::new();

    for card in discovered {
        let href = card.href.trim();
        let Some((place_id, lat, lng)) = place_id_from_href(href) else {
            tracing::debug!("No coordinates in href, skipping '{}'", card.name);
            stats.unparsed += 1;
            continue;
        };

        if !seen.insert(place_id.clone()) {
            stats.duplicates += 1;
            continue;
        }

        if storage.place_exists(&place_id)? {
            stats.already_done += 1;
            continue;
        }

        tasks.push(PlaceTask {
            place: PlaceRef {
                place_id,
                city: scope.city.clone(),
                query: scope.query.clone(),
                tile_index: scope.tile_index,
                name: card.name.trim().to_string(),
                href: href.to_string(),
                lat,
                lng,
                run_id: scope.run_id.clone(),
            },
        });
    }

    Ok((tasks, stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::make_place_id;
    use crate::storage::{PlaceFields, SqliteStorage};

    fn card(name: &str, href: &str) -> DiscoveredPlace {
        DiscoveredPlace {
            name: name.to_string(),
            href: href.to_string(),
        }
    }

    fn scope() -> TileScope {
        TileScope {
            run_id: "run1".to_string(),
            city: "Paris".to_string(),
            query: "cafe".to_string(),
            tile_index: 4,
        }
    }

    #[test]
    fn test_build_skips_duplicates_unparsed_and_done() {
        let storage = SqliteStorage::open_in_memory().unwrap();

        let cards = vec![
            card("A", "https://www.google.com/maps/place/A/@48.1,2.1,17z"),
            card("A again", "https://www.google.com/maps/place/A/@48.1,2.1,17z"),
            card("No coords", "https://www.google.com/maps/place/Nowhere"),
            card("B", "https://www.google.com/maps/place/B/@48.2,2.2,17z"),
            card("C", "https://www.google.com/maps/place/C/@48.3,2.3,17z"),
        ];

        // C already has a successful record
        let (tasks, _) = build_place_tasks(&cards[4..], &scope(), &storage).unwrap();
        storage
            .upsert_place_success(
                &tasks[0].place,
                &PlaceFields {
                    address: "x".to_string(),
                    ..PlaceFields::default()
                },
            )
            .unwrap();

        let (tasks, stats) = build_place_tasks(&cards, &scope(), &storage).unwrap();
        let names: Vec<&str> = tasks.iter().map(|t| t.place.name.as_str()).collect();
        assert_eq!(names, vec!["A", "B"]);
        assert_eq!(
            stats,
            TaskBuildStats {
                unparsed: 1,
                duplicates: 1,
                already_done: 1
            }
        );

        let a = &tasks[0].place;
        assert_eq!(a.place_id, make_place_id(48.1, 2.1));
        assert_eq!(a.tile_index, 4);
        assert_eq!(a.run_id, "run1");
    }

    #[test]
    fn test_failed_places_are_rebuilt() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let cards = vec![card("A", "https://www.google.com/maps/place/A/@48.1,2.1,17z")];

        let (tasks, _) = build_place_tasks(&cards, &scope(), &storage).unwrap();
        storage
            .upsert_place_failure(&tasks[0].place, "missing_address", &[])
            .unwrap();

        let (tasks, stats) = build_place_tasks(&cards, &scope(), &storage).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(stats.already_done, 0);
    }
}
