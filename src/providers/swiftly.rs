//! Client for the Swiftly-hosted GTFS-realtime trip updates feed (JSON
//! rendition) and the wire shape it returns.

use serde::de::{self, Deserializer};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

use crate::config::FeedConfig;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Feed returned HTTP {0}")]
    Status(reqwest::StatusCode),
    #[error("Malformed feed body: {0}")]
    Json(#[from] serde_json::Error),
}

/// HTTP client for the upstream trip updates feed
pub struct SwiftlyClient {
    client: reqwest::Client,
    url: String,
}

impl SwiftlyClient {
    pub fn new(config: &FeedConfig) -> Result<Self, FeedError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        let url = format!(
            "{}?apiKey={}&format=json",
            config.url,
            urlencoding::encode(&config.api_key)
        );

        Ok(Self { client, url })
    }

    /// Fetch and decode one snapshot of the trip updates feed.
    pub async fn fetch_trip_updates(&self) -> Result<FeedMessage, FeedError> {
        let response = self.client.get(&self.url).send().await?;

        if !response.status().is_success() {
            return Err(FeedError::Status(response.status()));
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(FeedError::from)
    }
}

// Wire shape of the feed. Everything below the top-level entity list is
// optional here; presence of contract-guaranteed fields is checked when the
// snapshot is built, so a violation is reported against the entity that
// lacks the field instead of failing deep inside decoding.

#[derive(Debug, Deserialize)]
pub struct FeedMessage {
    pub entity: Vec<FeedEntity>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedEntity {
    pub id: Option<String>,
    pub trip_update: Option<TripUpdateWire>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TripUpdateWire {
    pub trip: Option<TripDescriptorWire>,
    pub timestamp: Option<String>,
    pub vehicle: Option<VehicleWire>,
    pub stop_time_update: Option<Vec<StopTimeUpdateWire>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TripDescriptorWire {
    pub trip_id: Option<String>,
    pub start_time: Option<String>,
    pub start_date: Option<String>,
    pub schedule_relationship: Option<String>,
    pub route_id: Option<String>,
    #[serde(default, deserialize_with = "de_flexible_int")]
    pub direction_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct VehicleWire {
    pub id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopTimeUpdateWire {
    #[serde(default, deserialize_with = "de_flexible_int")]
    pub stop_sequence: Option<i64>,
    pub stop_id: Option<String>,
    pub arrival: Option<StopTimeEventWire>,
    pub departure: Option<StopTimeEventWire>,
    pub schedule_relationship: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StopTimeEventWire {
    pub time: Option<String>,
    pub uncertainty: Option<String>,
}

/// stopSequence and directionId arrive as JSON numbers or numeric strings
/// depending on the feed rendition. Both forms must map to the same integer
/// before identity synthesis, or the same stop would change identity between
/// polls.
fn de_flexible_int<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum IntOrString {
        Int(i64),
        Str(String),
    }

    match Option::<IntOrString>::deserialize(deserializer)? {
        None => Ok(None),
        Some(IntOrString::Int(i)) => Ok(Some(i)),
        Some(IntOrString::Str(s)) => s
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|_| de::Error::custom(format!("invalid integer value `{s}`"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_feed_entity() {
        let json = r#"{
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
                        "vehicle": { "id": "V9" },
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
        }"#;

        let feed: FeedMessage = serde_json::from_str(json).expect("decode feed");
        assert_eq!(feed.entity.len(), 1);

        let entity = &feed.entity[0];
        assert_eq!(entity.id.as_deref(), Some("T1"));

        let trip_update = entity.trip_update.as_ref().expect("tripUpdate present");
        let trip = trip_update.trip.as_ref().expect("trip present");
        assert_eq!(trip.trip_id.as_deref(), Some("100"));
        assert_eq!(trip.direction_id, Some(0));
        assert_eq!(trip_update.timestamp.as_deref(), Some("1700000000"));

        let stus = trip_update.stop_time_update.as_ref().expect("stops present");
        assert_eq!(stus[0].stop_sequence, Some(1));
        let arrival = stus[0].arrival.as_ref().expect("arrival present");
        assert_eq!(arrival.time.as_deref(), Some("1700000100"));
        assert!(arrival.uncertainty.is_none());
        assert!(stus[0].departure.is_none());
    }

    #[test]
    fn numeric_string_and_number_decode_to_the_same_integer() {
        let as_number: StopTimeUpdateWire =
            serde_json::from_str(r#"{"stopSequence": 47}"#).unwrap();
        let as_string: StopTimeUpdateWire =
            serde_json::from_str(r#"{"stopSequence": "47"}"#).unwrap();

        assert_eq!(as_number.stop_sequence, Some(47));
        assert_eq!(as_number.stop_sequence, as_string.stop_sequence);
    }

    #[test]
    fn non_numeric_sequence_is_a_decode_error() {
        let result = serde_json::from_str::<StopTimeUpdateWire>(r#"{"stopSequence": "47a"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn missing_entity_list_is_a_decode_error() {
        let result = serde_json::from_str::<FeedMessage>(r#"{}"#);
        assert!(result.is_err());
    }

    #[test]
    fn error_display_status() {
        let err = FeedError::Status(reqwest::StatusCode::UNAUTHORIZED);
        assert_eq!(err.to_string(), "Feed returned HTTP 401 Unauthorized");
    }
}
