//! GTFS-realtime message types.
//!
//! Mirrors `gtfs-realtime.proto` (proto2), experimental messages included.
//! Nested proto messages are flattened to top-level structs named after the
//! inner message. Enumerations are kept as their raw `int32` wire values so
//! that values newer than this file survive decoding.
//!
//! Extension fields are skipped here; see [`super::extensions`] for the
//! extension families that can be decoded on top of a message.

use serde::Serialize;

#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
pub struct FeedMessage {
    /// Required.
    #[prost(message, optional, tag = "1")]
    pub header: Option<FeedHeader>,
    #[prost(message, repeated, tag = "2")]
    pub entity: Vec<FeedEntity>,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
pub struct FeedHeader {
    /// Required.
    #[prost(string, optional, tag = "1")]
    pub gtfs_realtime_version: Option<String>,
    /// 0 = FULL_DATASET, 1 = DIFFERENTIAL
    #[prost(int32, optional, tag = "2")]
    pub incrementality: Option<i32>,
    /// POSIX seconds.
    #[prost(uint64, optional, tag = "3")]
    pub timestamp: Option<u64>,
    #[prost(string, optional, tag = "4")]
    pub feed_version: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
pub struct FeedEntity {
    /// Required.
    #[prost(string, optional, tag = "1")]
    pub id: Option<String>,
    #[prost(bool, optional, tag = "2")]
    pub is_deleted: Option<bool>,
    #[prost(message, optional, tag = "3")]
    pub trip_update: Option<TripUpdate>,
    #[prost(message, optional, tag = "4")]
    pub vehicle: Option<VehiclePosition>,
    #[prost(message, optional, tag = "5")]
    pub alert: Option<Alert>,
    #[prost(message, optional, tag = "6")]
    pub shape: Option<Shape>,
    #[prost(message, optional, tag = "7")]
    pub stop: Option<Stop>,
    #[prost(message, optional, tag = "8")]
    pub trip_modifications: Option<TripModifications>,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
pub struct TripUpdate {
    /// Required.
    #[prost(message, optional, tag = "1")]
    pub trip: Option<TripDescriptor>,
    #[prost(message, repeated, tag = "2")]
    pub stop_time_update: Vec<StopTimeUpdate>,
    #[prost(message, optional, tag = "3")]
    pub vehicle: Option<VehicleDescriptor>,
    #[prost(uint64, optional, tag = "4")]
    pub timestamp: Option<u64>,
    #[prost(int32, optional, tag = "5")]
    pub delay: Option<i32>,
    #[prost(message, optional, tag = "6")]
    pub trip_properties: Option<TripProperties>,
}

/// `TripUpdate.StopTimeEvent`
#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
pub struct StopTimeEvent {
    #[prost(int32, optional, tag = "1")]
    pub delay: Option<i32>,
    #[prost(int64, optional, tag = "2")]
    pub time: Option<i64>,
    #[prost(int32, optional, tag = "3")]
    pub uncertainty: Option<i32>,
    #[prost(int64, optional, tag = "4")]
    pub scheduled_time: Option<i64>,
}

/// `TripUpdate.StopTimeUpdate`
#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
pub struct StopTimeUpdate {
    #[prost(uint32, optional, tag = "1")]
    pub stop_sequence: Option<u32>,
    #[prost(message, optional, tag = "2")]
    pub arrival: Option<StopTimeEvent>,
    #[prost(message, optional, tag = "3")]
    pub departure: Option<StopTimeEvent>,
    #[prost(string, optional, tag = "4")]
    pub stop_id: Option<String>,
    /// 0 = SCHEDULED, 1 = SKIPPED, 2 = NO_DATA, 3 = UNSCHEDULED
    #[prost(int32, optional, tag = "5")]
    pub schedule_relationship: Option<i32>,
    #[prost(message, optional, tag = "6")]
    pub stop_time_properties: Option<StopTimeProperties>,
    #[prost(int32, optional, tag = "7")]
    pub departure_occupancy_status: Option<i32>,
}

/// `TripUpdate.StopTimeUpdate.StopTimeProperties`
#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
pub struct StopTimeProperties {
    #[prost(string, optional, tag = "1")]
    pub assigned_stop_id: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub stop_headsign: Option<String>,
    #[prost(int32, optional, tag = "3")]
    pub pickup_type: Option<i32>,
    #[prost(int32, optional, tag = "4")]
    pub drop_off_type: Option<i32>,
}

/// `TripUpdate.TripProperties`
#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
pub struct TripProperties {
    #[prost(string, optional, tag = "1")]
    pub trip_id: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub start_date: Option<String>,
    #[prost(string, optional, tag = "3")]
    pub start_time: Option<String>,
    #[prost(string, optional, tag = "4")]
    pub shape_id: Option<String>,
    #[prost(string, optional, tag = "5")]
    pub trip_headsign: Option<String>,
    #[prost(string, optional, tag = "6")]
    pub trip_short_name: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
pub struct VehiclePosition {
    #[prost(message, optional, tag = "1")]
    pub trip: Option<TripDescriptor>,
    #[prost(message, optional, tag = "2")]
    pub position: Option<Position>,
    #[prost(uint32, optional, tag = "3")]
    pub current_stop_sequence: Option<u32>,
    #[prost(int32, optional, tag = "4")]
    pub current_status: Option<i32>,
    #[prost(uint64, optional, tag = "5")]
    pub timestamp: Option<u64>,
    #[prost(int32, optional, tag = "6")]
    pub congestion_level: Option<i32>,
    #[prost(string, optional, tag = "7")]
    pub stop_id: Option<String>,
    #[prost(message, optional, tag = "8")]
    pub vehicle: Option<VehicleDescriptor>,
    #[prost(int32, optional, tag = "9")]
    pub occupancy_status: Option<i32>,
    #[prost(uint32, optional, tag = "10")]
    pub occupancy_percentage: Option<u32>,
    #[prost(message, repeated, tag = "11")]
    pub multi_carriage_details: Vec<CarriageDetails>,
}

/// `VehiclePosition.CarriageDetails`
#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
pub struct CarriageDetails {
    #[prost(string, optional, tag = "1")]
    pub id: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub label: Option<String>,
    #[prost(int32, optional, tag = "3")]
    pub occupancy_status: Option<i32>,
    #[prost(int32, optional, tag = "4")]
    pub occupancy_percentage: Option<i32>,
    #[prost(uint32, optional, tag = "5")]
    pub carriage_sequence: Option<u32>,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
pub struct Alert {
    #[prost(message, repeated, tag = "1")]
    pub active_period: Vec<TimeRange>,
    #[prost(message, repeated, tag = "5")]
    pub informed_entity: Vec<EntitySelector>,
    #[prost(int32, optional, tag = "6")]
    pub cause: Option<i32>,
    #[prost(int32, optional, tag = "7")]
    pub effect: Option<i32>,
    #[prost(message, optional, tag = "8")]
    pub url: Option<TranslatedString>,
    #[prost(message, optional, tag = "10")]
    pub header_text: Option<TranslatedString>,
    #[prost(message, optional, tag = "11")]
    pub description_text: Option<TranslatedString>,
    #[prost(message, optional, tag = "12")]
    pub tts_header_text: Option<TranslatedString>,
    #[prost(message, optional, tag = "13")]
    pub tts_description_text: Option<TranslatedString>,
    /// 1 = UNKNOWN_SEVERITY, 2 = INFO, 3 = WARNING, 4 = SEVERE
    #[prost(int32, optional, tag = "14")]
    pub severity_level: Option<i32>,
    #[prost(message, optional, tag = "15")]
    pub image: Option<TranslatedImage>,
    #[prost(message, optional, tag = "16")]
    pub image_alternative_text: Option<TranslatedString>,
    #[prost(message, optional, tag = "17")]
    pub cause_detail: Option<TranslatedString>,
    #[prost(message, optional, tag = "18")]
    pub effect_detail: Option<TranslatedString>,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
pub struct TimeRange {
    #[prost(uint64, optional, tag = "1")]
    pub start: Option<u64>,
    #[prost(uint64, optional, tag = "2")]
    pub end: Option<u64>,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
pub struct Position {
    /// Required.
    #[prost(float, optional, tag = "1")]
    pub latitude: Option<f32>,
    /// Required.
    #[prost(float, optional, tag = "2")]
    pub longitude: Option<f32>,
    #[prost(float, optional, tag = "3")]
    pub bearing: Option<f32>,
    #[prost(double, optional, tag = "4")]
    pub odometer: Option<f64>,
    #[prost(float, optional, tag = "5")]
    pub speed: Option<f32>,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
pub struct TripDescriptor {
    #[prost(string, optional, tag = "1")]
    pub trip_id: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub start_time: Option<String>,
    #[prost(string, optional, tag = "3")]
    pub start_date: Option<String>,
    #[prost(int32, optional, tag = "4")]
    pub schedule_relationship: Option<i32>,
    #[prost(string, optional, tag = "5")]
    pub route_id: Option<String>,
    #[prost(uint32, optional, tag = "6")]
    pub direction_id: Option<u32>,
    #[prost(message, optional, tag = "7")]
    pub modified_trip: Option<ModifiedTripSelector>,
}

/// `TripDescriptor.ModifiedTripSelector`
#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
pub struct ModifiedTripSelector {
    #[prost(string, optional, tag = "1")]
    pub modifications_id: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub affected_trip_id: Option<String>,
    #[prost(string, optional, tag = "3")]
    pub start_time: Option<String>,
    #[prost(string, optional, tag = "4")]
    pub start_date: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
pub struct VehicleDescriptor {
    #[prost(string, optional, tag = "1")]
    pub id: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub label: Option<String>,
    #[prost(string, optional, tag = "3")]
    pub license_plate: Option<String>,
    #[prost(int32, optional, tag = "4")]
    pub wheelchair_accessible: Option<i32>,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
pub struct EntitySelector {
    #[prost(string, optional, tag = "1")]
    pub agency_id: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub route_id: Option<String>,
    #[prost(int32, optional, tag = "3")]
    pub route_type: Option<i32>,
    #[prost(message, optional, tag = "4")]
    pub trip: Option<TripDescriptor>,
    #[prost(string, optional, tag = "5")]
    pub stop_id: Option<String>,
    #[prost(uint32, optional, tag = "6")]
    pub direction_id: Option<u32>,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
pub struct TranslatedString {
    #[prost(message, repeated, tag = "1")]
    pub translation: Vec<Translation>,
}

/// `TranslatedString.Translation`
#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
pub struct Translation {
    /// Required.
    #[prost(string, optional, tag = "1")]
    pub text: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub language: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
pub struct TranslatedImage {
    #[prost(message, repeated, tag = "1")]
    pub localized_image: Vec<LocalizedImage>,
}

/// `TranslatedImage.LocalizedImage`
#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
pub struct LocalizedImage {
    /// Required.
    #[prost(string, optional, tag = "1")]
    pub url: Option<String>,
    /// Required.
    #[prost(string, optional, tag = "2")]
    pub media_type: Option<String>,
    #[prost(string, optional, tag = "3")]
    pub language: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
pub struct Shape {
    #[prost(string, optional, tag = "1")]
    pub shape_id: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub encoded_polyline: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
pub struct Stop {
    #[prost(string, optional, tag = "1")]
    pub stop_id: Option<String>,
    #[prost(message, optional, tag = "2")]
    pub stop_code: Option<TranslatedString>,
    #[prost(message, optional, tag = "3")]
    pub stop_name: Option<TranslatedString>,
    #[prost(message, optional, tag = "4")]
    pub tts_stop_name: Option<TranslatedString>,
    #[prost(message, optional, tag = "5")]
    pub stop_desc: Option<TranslatedString>,
    #[prost(float, optional, tag = "6")]
    pub stop_lat: Option<f32>,
    #[prost(float, optional, tag = "7")]
    pub stop_lon: Option<f32>,
    #[prost(string, optional, tag = "8")]
    pub zone_id: Option<String>,
    #[prost(message, optional, tag = "9")]
    pub stop_url: Option<TranslatedString>,
    #[prost(string, optional, tag = "11")]
    pub parent_station: Option<String>,
    #[prost(string, optional, tag = "12")]
    pub stop_timezone: Option<String>,
    #[prost(int32, optional, tag = "13")]
    pub wheelchair_boarding: Option<i32>,
    #[prost(string, optional, tag = "14")]
    pub level_id: Option<String>,
    #[prost(message, optional, tag = "15")]
    pub platform_code: Option<TranslatedString>,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
pub struct TripModifications {
    #[prost(message, repeated, tag = "1")]
    pub selected_trips: Vec<SelectedTrips>,
    #[prost(string, repeated, tag = "2")]
    pub start_times: Vec<String>,
    #[prost(string, repeated, tag = "3")]
    pub service_dates: Vec<String>,
    #[prost(message, repeated, tag = "4")]
    pub modifications: Vec<Modification>,
}

/// `TripModifications.SelectedTrips`
#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
pub struct SelectedTrips {
    #[prost(string, repeated, tag = "1")]
    pub trip_ids: Vec<String>,
    #[prost(string, optional, tag = "2")]
    pub shape_id: Option<String>,
}

/// `TripModifications.Modification`
#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
pub struct Modification {
    #[prost(message, optional, tag = "1")]
    pub start_stop_selector: Option<StopSelector>,
    #[prost(message, optional, tag = "2")]
    pub end_stop_selector: Option<StopSelector>,
    #[prost(int32, optional, tag = "3")]
    pub propagated_modification_delay: Option<i32>,
    #[prost(message, repeated, tag = "4")]
    pub replacement_stops: Vec<ReplacementStop>,
    #[prost(string, optional, tag = "5")]
    pub service_alert_id: Option<String>,
    #[prost(uint64, optional, tag = "6")]
    pub last_modified_time: Option<u64>,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
pub struct StopSelector {
    #[prost(uint32, optional, tag = "1")]
    pub stop_sequence: Option<u32>,
    #[prost(string, optional, tag = "2")]
    pub stop_id: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
pub struct ReplacementStop {
    #[prost(int32, optional, tag = "1")]
    pub travel_time_to_stop: Option<i32>,
    #[prost(string, optional, tag = "2")]
    pub stop_id: Option<String>,
}

/// Walks proto2 `required` fields, including those of nested messages.
pub trait RequiredFields {
    /// Appends the path of every required field missing below `path`.
    fn collect_missing(&self, path: &str, missing: &mut Vec<String>);
}

pub(crate) fn child_path(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", path, name)
    }
}

pub(crate) fn require<T>(field: &Option<T>, path: &str, name: &str, missing: &mut Vec<String>) {
    if field.is_none() {
        missing.push(child_path(path, name));
    }
}

/// Checks a set message field; absence is only an error for required fields.
pub(crate) fn nested<T: RequiredFields>(
    field: &Option<T>,
    path: &str,
    name: &str,
    missing: &mut Vec<String>,
) {
    if let Some(value) = field {
        value.collect_missing(&child_path(path, name), missing);
    }
}

pub(crate) fn each<T: RequiredFields>(items: &[T], path: &str, name: &str, missing: &mut Vec<String>) {
    let base = child_path(path, name);
    for (i, item) in items.iter().enumerate() {
        item.collect_missing(&format!("{}[{}]", base, i), missing);
    }
}

impl RequiredFields for FeedMessage {
    fn collect_missing(&self, path: &str, missing: &mut Vec<String>) {
        require(&self.header, path, "header", missing);
        nested(&self.header, path, "header", missing);
        each(&self.entity, path, "entity", missing);
    }
}

impl RequiredFields for FeedHeader {
    fn collect_missing(&self, path: &str, missing: &mut Vec<String>) {
        require(&self.gtfs_realtime_version, path, "gtfs_realtime_version", missing);
    }
}

impl RequiredFields for FeedEntity {
    fn collect_missing(&self, path: &str, missing: &mut Vec<String>) {
        require(&self.id, path, "id", missing);
        nested(&self.trip_update, path, "trip_update", missing);
        nested(&self.vehicle, path, "vehicle", missing);
        nested(&self.alert, path, "alert", missing);
        nested(&self.stop, path, "stop", missing);
    }
}

impl RequiredFields for TripUpdate {
    fn collect_missing(&self, path: &str, missing: &mut Vec<String>) {
        require(&self.trip, path, "trip", missing);
    }
}

impl RequiredFields for VehiclePosition {
    fn collect_missing(&self, path: &str, missing: &mut Vec<String>) {
        nested(&self.position, path, "position", missing);
    }
}

impl RequiredFields for Position {
    fn collect_missing(&self, path: &str, missing: &mut Vec<String>) {
        require(&self.latitude, path, "latitude", missing);
        require(&self.longitude, path, "longitude", missing);
    }
}

impl RequiredFields for Alert {
    fn collect_missing(&self, path: &str, missing: &mut Vec<String>) {
        let texts = [
            (&self.url, "url"),
            (&self.header_text, "header_text"),
            (&self.description_text, "description_text"),
            (&self.tts_header_text, "tts_header_text"),
            (&self.tts_description_text, "tts_description_text"),
            (&self.image_alternative_text, "image_alternative_text"),
            (&self.cause_detail, "cause_detail"),
            (&self.effect_detail, "effect_detail"),
        ];
        for (text, name) in texts {
            nested(text, path, name, missing);
        }
        nested(&self.image, path, "image", missing);
    }
}

impl RequiredFields for Stop {
    fn collect_missing(&self, path: &str, missing: &mut Vec<String>) {
        let texts = [
            (&self.stop_code, "stop_code"),
            (&self.stop_name, "stop_name"),
            (&self.tts_stop_name, "tts_stop_name"),
            (&self.stop_desc, "stop_desc"),
            (&self.stop_url, "stop_url"),
            (&self.platform_code, "platform_code"),
        ];
        for (text, name) in texts {
            nested(text, path, name, missing);
        }
    }
}

impl RequiredFields for TranslatedString {
    fn collect_missing(&self, path: &str, missing: &mut Vec<String>) {
        each(&self.translation, path, "translation", missing);
    }
}

impl RequiredFields for Translation {
    fn collect_missing(&self, path: &str, missing: &mut Vec<String>) {
        require(&self.text, path, "text", missing);
    }
}

impl RequiredFields for TranslatedImage {
    fn collect_missing(&self, path: &str, missing: &mut Vec<String>) {
        each(&self.localized_image, path, "localized_image", missing);
    }
}

impl RequiredFields for LocalizedImage {
    fn collect_missing(&self, path: &str, missing: &mut Vec<String>) {
        require(&self.url, path, "url", missing);
        require(&self.media_type, path, "media_type", missing);
    }
}

impl FeedMessage {
    /// Paths of every required field that is missing, in message order.
    pub fn missing_required_fields(&self) -> Vec<String> {
        let mut missing = Vec::new();
        self.collect_missing("", &mut missing);
        missing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    fn valid_header() -> Option<FeedHeader> {
        Some(FeedHeader {
            gtfs_realtime_version: Some("2.0".into()),
            ..Default::default()
        })
    }

    fn message_with(entity: FeedEntity) -> FeedMessage {
        FeedMessage {
            header: valid_header(),
            entity: vec![FeedEntity {
                id: Some("e1".into()),
                ..entity
            }],
        }
    }

    fn text(value: Option<&str>) -> Option<TranslatedString> {
        Some(TranslatedString {
            translation: vec![Translation {
                text: value.map(str::to_string),
                language: Some("en".into()),
            }],
        })
    }

    #[test]
    fn test_decodes_what_it_encodes() {
        let msg = FeedMessage {
            header: Some(FeedHeader {
                gtfs_realtime_version: Some("2.0".into()),
                incrementality: Some(0),
                timestamp: Some(1_700_000_000),
                feed_version: Some("2025-03-14".into()),
            }),
            entity: vec![FeedEntity {
                id: Some("v1".into()),
                vehicle: Some(VehiclePosition {
                    position: Some(Position {
                        latitude: Some(40.75),
                        longitude: Some(-73.99),
                        ..Default::default()
                    }),
                    multi_carriage_details: vec![CarriageDetails {
                        id: Some("car-1".into()),
                        occupancy_percentage: Some(40),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
                ..Default::default()
            }],
        };
        let decoded = FeedMessage::decode(msg.encode_to_vec().as_slice()).unwrap();
        assert_eq!(decoded, msg);
        assert!(decoded.missing_required_fields().is_empty());
    }

    #[test]
    fn test_experimental_entities_decode() {
        let msg = FeedMessage {
            header: valid_header(),
            entity: vec![
                FeedEntity {
                    id: Some("shape".into()),
                    shape: Some(Shape {
                        shape_id: Some("detour-1".into()),
                        encoded_polyline: Some("_p~iF~ps|U".into()),
                    }),
                    ..Default::default()
                },
                FeedEntity {
                    id: Some("mods".into()),
                    trip_modifications: Some(TripModifications {
                        service_dates: vec!["20250314".into()],
                        modifications: vec![Modification {
                            replacement_stops: vec![ReplacementStop {
                                travel_time_to_stop: Some(90),
                                stop_id: Some("A27".into()),
                            }],
                            ..Default::default()
                        }],
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            ],
        };
        let decoded = FeedMessage::decode(msg.encode_to_vec().as_slice()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_unknown_extension_fields_are_skipped() {
        // header { gtfs_realtime_version: "2.0" } followed by an extension-range
        // field (tag 1001, varint 7) that this message does not model.
        let mut bytes = FeedMessage {
            header: valid_header(),
            entity: vec![],
        }
        .encode_to_vec();
        bytes.extend_from_slice(&[0xc8, 0x3e, 0x07]);

        let decoded = FeedMessage::decode(bytes.as_slice()).unwrap();
        assert_eq!(
            decoded.header.unwrap().gtfs_realtime_version.as_deref(),
            Some("2.0")
        );
    }

    #[test]
    fn test_missing_header_fields_are_named() {
        assert_eq!(FeedMessage::default().missing_required_fields(), vec!["header"]);

        let msg = FeedMessage {
            header: Some(FeedHeader::default()),
            entity: vec![],
        };
        assert_eq!(
            msg.missing_required_fields(),
            vec!["header.gtfs_realtime_version"]
        );
    }

    #[test]
    fn test_missing_entity_id_is_named_with_index() {
        let msg = FeedMessage {
            header: valid_header(),
            entity: vec![
                FeedEntity {
                    id: Some("ok".into()),
                    ..Default::default()
                },
                FeedEntity::default(),
            ],
        };
        assert_eq!(msg.missing_required_fields(), vec!["entity[1].id"]);
    }

    #[test]
    fn test_trip_update_without_trip_is_incomplete() {
        let msg = message_with(FeedEntity {
            trip_update: Some(TripUpdate {
                delay: Some(3),
                ..Default::default()
            }),
            ..Default::default()
        });
        assert_eq!(msg.missing_required_fields(), vec!["entity[0].trip_update.trip"]);
    }

    #[test]
    fn test_vehicle_position_requires_coordinates() {
        let msg = message_with(FeedEntity {
            vehicle: Some(VehiclePosition {
                position: Some(Position {
                    bearing: Some(90.0),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        });
        assert_eq!(
            msg.missing_required_fields(),
            vec![
                "entity[0].vehicle.position.latitude",
                "entity[0].vehicle.position.longitude",
            ]
        );
    }

    #[test]
    fn test_translation_requires_text() {
        let msg = message_with(FeedEntity {
            alert: Some(Alert {
                header_text: text(Some("Delays")),
                description_text: text(None),
                ..Default::default()
            }),
            ..Default::default()
        });
        assert_eq!(
            msg.missing_required_fields(),
            vec!["entity[0].alert.description_text.translation[0].text"]
        );
    }

    #[test]
    fn test_localized_image_requires_url_and_media_type() {
        let msg = message_with(FeedEntity {
            alert: Some(Alert {
                image: Some(TranslatedImage {
                    localized_image: vec![LocalizedImage {
                        url: Some("https://example.org/map.png".into()),
                        ..Default::default()
                    }],
                }),
                ..Default::default()
            }),
            ..Default::default()
        });
        assert_eq!(
            msg.missing_required_fields(),
            vec!["entity[0].alert.image.localized_image[0].media_type"]
        );
    }

    #[test]
    fn test_stop_names_are_checked() {
        let msg = message_with(FeedEntity {
            stop: Some(Stop {
                stop_id: Some("A27".into()),
                stop_name: text(None),
                ..Default::default()
            }),
            ..Default::default()
        });
        assert_eq!(
            msg.missing_required_fields(),
            vec!["entity[0].stop.stop_name.translation[0].text"]
        );
    }
}
