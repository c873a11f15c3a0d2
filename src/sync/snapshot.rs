//! In-memory model of one feed pull and the identity scheme applied to it.
//!
//! The wire shape is decoded here into fully validated records. Stop time
//! updates get a synthesized identity (`{trip update id}_{stop sequence}`)
//! because the upstream feed provides none of its own.

use std::collections::HashSet;

use thiserror::Error;

use crate::providers::swiftly::{FeedEntity, FeedMessage, StopTimeUpdateWire};

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("Entity `{entity}` is missing required field `{field}`")]
    MissingField { entity: String, field: &'static str },
    #[error("Duplicate trip update id `{id}` in snapshot")]
    DuplicateTripUpdate { id: String },
    #[error("Duplicate stop sequence {stop_sequence} under trip update `{trip_update_id}`")]
    DuplicateStopSequence {
        trip_update_id: String,
        stop_sequence: i64,
    },
}

/// One fully validated feed pull.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub trip_updates: Vec<TripUpdateRecord>,
}

#[derive(Debug, Clone)]
pub struct TripUpdateRecord {
    /// Feed-provided id, stable across polls for the same trip instance
    pub id: String,
    pub trip_id: String,
    pub start_time: String,
    pub start_date: String,
    /// Opaque upstream status string (SCHEDULED, CANCELED, ...)
    pub schedule_relationship: String,
    pub route_id: String,
    pub direction_id: i64,
    /// Feed timestamp, preserved verbatim
    pub timestamp: String,
    /// Absent for CANCELED trips
    pub vehicle_id: Option<String>,
    pub stop_time_updates: Vec<StopTimeRecord>,
}

#[derive(Debug, Clone)]
pub struct StopTimeRecord {
    /// Synthesized id, see [`stop_time_update_id`]
    pub id: String,
    pub stop_id: String,
    pub stop_sequence: i64,
    pub arrival_time: Option<String>,
    pub arrival_uncertainty: Option<String>,
    pub departure_time: Option<String>,
    pub departure_uncertainty: Option<String>,
    pub schedule_relationship: String,
    pub trip_update_id: String,
}

/// Render the synthesized stop time update id. The sequence is written as
/// its canonical decimal form, so `"47"` and `47` on the wire yield the
/// same identity.
pub fn stop_time_update_id(trip_update_id: &str, stop_sequence: i64) -> String {
    format!("{trip_update_id}_{stop_sequence}")
}

impl Snapshot {
    /// Map the wire shape into validated records. Fails on the first entity
    /// that violates the feed contract rather than ingesting a partial
    /// snapshot.
    pub fn from_feed(feed: FeedMessage) -> Result<Self, SnapshotError> {
        let mut trip_updates = Vec::with_capacity(feed.entity.len());
        let mut seen_ids = HashSet::with_capacity(feed.entity.len());

        for (index, entity) in feed.entity.into_iter().enumerate() {
            let record = decode_entity(index, entity)?;
            if !seen_ids.insert(record.id.clone()) {
                return Err(SnapshotError::DuplicateTripUpdate { id: record.id });
            }
            trip_updates.push(record);
        }

        Ok(Self { trip_updates })
    }

    /// Identity index of all trip updates present.
    pub fn trip_update_ids(&self) -> HashSet<String> {
        self.trip_updates.iter().map(|tu| tu.id.clone()).collect()
    }

    /// Identity index of all synthesized stop time update ids present,
    /// across every trip update that declares children.
    pub fn stop_time_update_ids(&self) -> HashSet<String> {
        self.trip_updates
            .iter()
            .flat_map(|tu| tu.stop_time_updates.iter().map(|stu| stu.id.clone()))
            .collect()
    }
}

fn decode_entity(index: usize, entity: FeedEntity) -> Result<TripUpdateRecord, SnapshotError> {
    let entity_label = entity.id.clone().unwrap_or_else(|| format!("#{index}"));
    let missing = |field: &'static str| SnapshotError::MissingField {
        entity: entity_label.clone(),
        field,
    };

    let id = entity.id.ok_or_else(|| missing("id"))?;
    let trip_update = entity.trip_update.ok_or_else(|| missing("tripUpdate"))?;
    let trip = trip_update.trip.ok_or_else(|| missing("trip"))?;
    let timestamp = trip_update.timestamp.ok_or_else(|| missing("timestamp"))?;

    let trip_id = trip.trip_id.ok_or_else(|| missing("tripId"))?;
    let start_time = trip.start_time.ok_or_else(|| missing("startTime"))?;
    let start_date = trip.start_date.ok_or_else(|| missing("startDate"))?;
    let schedule_relationship = trip
        .schedule_relationship
        .ok_or_else(|| missing("scheduleRelationship"))?;
    let route_id = trip.route_id.ok_or_else(|| missing("routeId"))?;
    let direction_id = trip.direction_id.ok_or_else(|| missing("directionId"))?;

    // vehicle is optional (absent for CANCELED trips), but a present vehicle
    // object must carry its id
    let vehicle_id = match trip_update.vehicle {
        Some(vehicle) => Some(vehicle.id.ok_or_else(|| missing("vehicle.id"))?),
        None => None,
    };

    // stopTimeUpdate is optional (absent for CANCELED trips) and then means
    // the trip owns zero children this cycle
    let mut stop_time_updates = Vec::new();
    let mut seen_sequences = HashSet::new();

    for stu in trip_update.stop_time_update.unwrap_or_default() {
        let record = decode_stop_time_update(&id, stu, &entity_label)?;
        if !seen_sequences.insert(record.stop_sequence) {
            return Err(SnapshotError::DuplicateStopSequence {
                trip_update_id: id,
                stop_sequence: record.stop_sequence,
            });
        }
        stop_time_updates.push(record);
    }

    Ok(TripUpdateRecord {
        id,
        trip_id,
        start_time,
        start_date,
        schedule_relationship,
        route_id,
        direction_id,
        timestamp,
        vehicle_id,
        stop_time_updates,
    })
}

fn decode_stop_time_update(
    trip_update_id: &str,
    stu: StopTimeUpdateWire,
    entity_label: &str,
) -> Result<StopTimeRecord, SnapshotError> {
    let missing = |field: &'static str| SnapshotError::MissingField {
        entity: entity_label.to_string(),
        field,
    };

    let stop_sequence = stu.stop_sequence.ok_or_else(|| missing("stopSequence"))?;
    let stop_id = stu.stop_id.ok_or_else(|| missing("stopId"))?;
    let schedule_relationship = stu
        .schedule_relationship
        .ok_or_else(|| missing("scheduleRelationship"))?;

    // arrival/departure and their inner fields are optional (CANCELED and
    // SKIPPED stops); exactly the subset that was present is kept
    let (arrival_time, arrival_uncertainty) = match stu.arrival {
        Some(event) => (event.time, event.uncertainty),
        None => (None, None),
    };
    let (departure_time, departure_uncertainty) = match stu.departure {
        Some(event) => (event.time, event.uncertainty),
        None => (None, None),
    };

    Ok(StopTimeRecord {
        id: stop_time_update_id(trip_update_id, stop_sequence),
        stop_id,
        stop_sequence,
        arrival_time,
        arrival_uncertainty,
        departure_time,
        departure_uncertainty,
        schedule_relationship,
        trip_update_id: trip_update_id.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_from_json(json: &str) -> FeedMessage {
        serde_json::from_str(json).expect("decode feed")
    }

    #[test]
    fn builds_snapshot_from_example_feed() {
        let feed = feed_from_json(
            r#"{
                "entity": [
                    {
                        "id": "T1",
                        "tripUpdate": {
                            "trip": {
                                "tripId": "100",
                                "startTime": "08:00:00",
                                "startDate": "20240101",
                                "scheduleRelationship": "SCHEDULED",
                                "routeId": "22",
                                "directionId": 0
                            },
                            "timestamp": "1700000000",
                            "stopTimeUpdate": [
                                {
                                    "stopSequence": 1,
                                    "stopId": "S1",
                                    "arrival": { "time": "1700000100" },
                                    "scheduleRelationship": "SCHEDULED"
                                }
                            ]
                        }
                    }
                ]
            }"#,
        );

        let snapshot = Snapshot::from_feed(feed).expect("build snapshot");
        assert_eq!(snapshot.trip_updates.len(), 1);

        let tu = &snapshot.trip_updates[0];
        assert_eq!(tu.id, "T1");
        assert_eq!(tu.trip_id, "100");
        assert_eq!(tu.direction_id, 0);
        assert_eq!(tu.timestamp, "1700000000");
        assert!(tu.vehicle_id.is_none());

        let stu = &tu.stop_time_updates[0];
        assert_eq!(stu.id, "T1_1");
        assert_eq!(stu.trip_update_id, "T1");
        assert_eq!(stu.arrival_time.as_deref(), Some("1700000100"));
        assert!(stu.arrival_uncertainty.is_none());
        assert!(stu.departure_time.is_none());

        assert!(snapshot.trip_update_ids().contains("T1"));
        assert!(snapshot.stop_time_update_ids().contains("T1_1"));
    }

    #[test]
    fn numeric_string_sequence_yields_the_same_identity() {
        let entity = |seq: &str| {
            format!(
                r#"{{
                    "entity": [
                        {{
                            "id": "T1",
                            "tripUpdate": {{
                                "trip": {{
                                    "tripId": "100",
                                    "startTime": "08:00:00",
                                    "startDate": "20240101",
                                    "scheduleRelationship": "SCHEDULED",
                                    "routeId": "22",
                                    "directionId": "1"
                                }},
                                "timestamp": "1700000000",
                                "stopTimeUpdate": [
                                    {{
                                        "stopSequence": {seq},
                                        "stopId": "S1",
                                        "scheduleRelationship": "SCHEDULED"
                                    }}
                                ]
                            }}
                        }}
                    ]
                }}"#
            )
        };

        let from_string = Snapshot::from_feed(feed_from_json(&entity("\"47\""))).unwrap();
        let from_number = Snapshot::from_feed(feed_from_json(&entity("47"))).unwrap();

        assert_eq!(from_string.trip_updates[0].stop_time_updates[0].id, "T1_47");
        assert_eq!(
            from_string.stop_time_update_ids(),
            from_number.stop_time_update_ids()
        );
        assert_eq!(from_string.trip_updates[0].direction_id, 1);
    }

    #[test]
    fn canceled_trip_without_vehicle_or_stops_is_valid() {
        let feed = feed_from_json(
            r#"{
                "entity": [
                    {
                        "id": "T2",
                        "tripUpdate": {
                            "trip": {
                                "tripId": "200",
                                "startTime": "09:00:00",
                                "startDate": "20240101",
                                "scheduleRelationship": "CANCELED",
                                "routeId": "22",
                                "directionId": 0
                            },
                            "timestamp": "1700000000"
                        }
                    }
                ]
            }"#,
        );

        let snapshot = Snapshot::from_feed(feed).expect("build snapshot");
        let tu = &snapshot.trip_updates[0];
        assert!(tu.vehicle_id.is_none());
        assert!(tu.stop_time_updates.is_empty());
        assert!(snapshot.stop_time_update_ids().is_empty());
    }

    #[test]
    fn missing_trip_is_a_validation_error() {
        let feed = feed_from_json(
            r#"{
                "entity": [
                    { "id": "T1", "tripUpdate": { "timestamp": "1700000000" } }
                ]
            }"#,
        );

        let err = Snapshot::from_feed(feed).unwrap_err();
        assert!(matches!(
            err,
            SnapshotError::MissingField { ref entity, field: "trip" } if entity == "T1"
        ));
    }

    #[test]
    fn missing_trip_update_is_a_validation_error() {
        let feed = feed_from_json(r#"{ "entity": [ { "id": "T1" } ] }"#);

        let err = Snapshot::from_feed(feed).unwrap_err();
        assert!(matches!(
            err,
            SnapshotError::MissingField { field: "tripUpdate", .. }
        ));
    }

    #[test]
    fn duplicate_trip_update_id_is_rejected() {
        let entity = r#"{
            "id": "T1",
            "tripUpdate": {
                "trip": {
                    "tripId": "100",
                    "startTime": "08:00:00",
                    "startDate": "20240101",
                    "scheduleRelationship": "SCHEDULED",
                    "routeId": "22",
                    "directionId": 0
                },
                "timestamp": "1700000000"
            }
        }"#;
        let feed = feed_from_json(&format!(r#"{{ "entity": [{entity}, {entity}] }}"#));

        let err = Snapshot::from_feed(feed).unwrap_err();
        assert!(matches!(
            err,
            SnapshotError::DuplicateTripUpdate { ref id } if id == "T1"
        ));
    }

    #[test]
    fn duplicate_stop_sequence_is_rejected() {
        let feed = feed_from_json(
            r#"{
                "entity": [
                    {
                        "id": "T1",
                        "tripUpdate": {
                            "trip": {
                                "tripId": "100",
                                "startTime": "08:00:00",
                                "startDate": "20240101",
                                "scheduleRelationship": "SCHEDULED",
                                "routeId": "22",
                                "directionId": 0
                            },
                            "timestamp": "1700000000",
                            "stopTimeUpdate": [
                                { "stopSequence": 1, "stopId": "S1", "scheduleRelationship": "SCHEDULED" },
                                { "stopSequence": "1", "stopId": "S2", "scheduleRelationship": "SCHEDULED" }
                            ]
                        }
                    }
                ]
            }"#,
        );

        let err = Snapshot::from_feed(feed).unwrap_err();
        assert!(matches!(
            err,
            SnapshotError::DuplicateStopSequence {
                ref trip_update_id,
                stop_sequence: 1,
            } if trip_update_id == "T1"
        ));
    }
}
