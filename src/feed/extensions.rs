//! GTFS-realtime extension families.
//!
//! prost has no extension registry, so each family is described by a small
//! message tree that follows the path from `FeedMessage` down to the extended
//! messages and holds nothing but the extension fields. Decoding the payload a
//! second time with that tree yields the extension values, which [`merge`]
//! then grafts onto the base JSON at the same paths. Families that are not
//! enabled are never decoded, so their fields stay skipped.

use prost::Message;
use serde::Serialize;
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::models::Extension;

use super::gtfs_realtime::{self as rt, each, nested, require, RequiredFields};

/// Extension values of one family, shaped like the base message's JSON.
#[derive(Debug)]
pub struct Overlay {
    pub value: Value,
    /// Required extension fields that are missing.
    pub missing: Vec<String>,
}

pub fn decode_extension(extension: Extension, body: &[u8]) -> Result<Overlay> {
    let overlay = match extension {
        Extension::Oba => overlay::<oba::FeedMessage>(body),
        Extension::Nyct => overlay::<nyct::FeedMessage>(body),
        Extension::Lirr => overlay::<lirr::FeedMessage>(body),
        Extension::Mnr => overlay::<mnr::FeedMessage>(body),
        Extension::Mtarr => overlay::<mtarr::FeedMessage>(body),
        Extension::Lmm => overlay::<lmm::FeedMessage>(body),
        Extension::Crowding => overlay::<crowding::FeedMessage>(body),
    };
    overlay.map_err(|e| AppError::Decode(format!("{} extension: {}", extension, e)))
}

fn overlay<M>(body: &[u8]) -> Result<Overlay>
where
    M: Message + Default + Serialize + RequiredFields,
{
    let message = M::decode(body)?;
    let mut missing = Vec::new();
    message.collect_missing("", &mut missing);
    Ok(Overlay {
        value: serde_json::to_value(&message)?,
        missing,
    })
}

/// Merges `overlay` into `base`. Arrays merge element-wise, nulls never
/// replace a value, and keys the base lacks are added.
pub fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (_, Value::Null) => {}
        (Value::Object(target), Value::Object(fields)) => {
            for (key, value) in fields {
                match target.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None if value.is_null() => {}
                    None => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (Value::Array(target), Value::Array(items)) => {
            for (existing, item) in target.iter_mut().zip(items) {
                merge(existing, item);
            }
        }
        (slot, value) => *slot = value,
    }
}

/// Stop-level track data published by the MTA commuter railroads.
#[derive(Clone, PartialEq, Message, Serialize)]
pub struct RailroadStopTimeUpdate {
    #[prost(string, optional, tag = "1")]
    pub track: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub train_status: Option<String>,
}

/// OneBusAway, extension number 1000.
pub mod oba {
    use super::*;

    #[derive(Clone, PartialEq, Message, Serialize)]
    pub struct OneBusAwayFeedHeader {
        #[prost(uint64, optional, tag = "1")]
        pub incremental_heartbeat_interval: Option<u64>,
    }

    #[derive(Clone, PartialEq, Message, Serialize)]
    pub struct OneBusAwayFeedEntity {
        #[prost(string, optional, tag = "1")]
        pub source: Option<String>,
    }

    #[derive(Clone, PartialEq, Message, Serialize)]
    pub struct FeedMessage {
        #[prost(message, optional, tag = "1")]
        pub header: Option<FeedHeader>,
        #[prost(message, repeated, tag = "2")]
        pub entity: Vec<FeedEntity>,
    }

    #[derive(Clone, PartialEq, Message, Serialize)]
    pub struct FeedHeader {
        #[prost(message, optional, tag = "1000")]
        pub oba_feed_header: Option<OneBusAwayFeedHeader>,
    }

    #[derive(Clone, PartialEq, Message, Serialize)]
    pub struct FeedEntity {
        #[prost(message, optional, tag = "1000")]
        pub oba_feed_entity: Option<OneBusAwayFeedEntity>,
    }

    impl RequiredFields for FeedMessage {
        fn collect_missing(&self, _path: &str, _missing: &mut Vec<String>) {}
    }
}

/// New York City Transit subway, extension number 1001.
pub mod nyct {
    use super::*;

    #[derive(Clone, PartialEq, Message, Serialize)]
    pub struct TripReplacementPeriod {
        #[prost(string, optional, tag = "1")]
        pub route_id: Option<String>,
        #[prost(message, optional, tag = "2")]
        pub replacement_period: Option<rt::TimeRange>,
    }

    #[derive(Clone, PartialEq, Message, Serialize)]
    pub struct NyctFeedHeader {
        /// Required.
        #[prost(string, optional, tag = "1")]
        pub nyct_subway_version: Option<String>,
        #[prost(message, repeated, tag = "2")]
        pub trip_replacement_period: Vec<TripReplacementPeriod>,
    }

    #[derive(Clone, PartialEq, Message, Serialize)]
    pub struct NyctTripDescriptor {
        #[prost(string, optional, tag = "1")]
        pub train_id: Option<String>,
        #[prost(bool, optional, tag = "2")]
        pub is_assigned: Option<bool>,
        /// 1 = NORTH, 2 = EAST, 3 = SOUTH, 4 = WEST
        #[prost(int32, optional, tag = "3")]
        pub direction: Option<i32>,
    }

    #[derive(Clone, PartialEq, Message, Serialize)]
    pub struct NyctStopTimeUpdate {
        #[prost(string, optional, tag = "1")]
        pub scheduled_track: Option<String>,
        #[prost(string, optional, tag = "2")]
        pub actual_track: Option<String>,
    }

    #[derive(Clone, PartialEq, Message, Serialize)]
    pub struct FeedMessage {
        #[prost(message, optional, tag = "1")]
        pub header: Option<FeedHeader>,
        #[prost(message, repeated, tag = "2")]
        pub entity: Vec<FeedEntity>,
    }

    #[derive(Clone, PartialEq, Message, Serialize)]
    pub struct FeedHeader {
        #[prost(message, optional, tag = "1001")]
        pub nyct_feed_header: Option<NyctFeedHeader>,
    }

    #[derive(Clone, PartialEq, Message, Serialize)]
    pub struct FeedEntity {
        #[prost(message, optional, tag = "3")]
        pub trip_update: Option<TripUpdate>,
        #[prost(message, optional, tag = "4")]
        pub vehicle: Option<VehiclePosition>,
    }

    #[derive(Clone, PartialEq, Message, Serialize)]
    pub struct TripUpdate {
        #[prost(message, optional, tag = "1")]
        pub trip: Option<TripDescriptor>,
        #[prost(message, repeated, tag = "2")]
        pub stop_time_update: Vec<StopTimeUpdate>,
    }

    #[derive(Clone, PartialEq, Message, Serialize)]
    pub struct VehiclePosition {
        #[prost(message, optional, tag = "1")]
        pub trip: Option<TripDescriptor>,
    }

    #[derive(Clone, PartialEq, Message, Serialize)]
    pub struct TripDescriptor {
        #[prost(message, optional, tag = "1001")]
        pub nyct_trip_descriptor: Option<NyctTripDescriptor>,
    }

    #[derive(Clone, PartialEq, Message, Serialize)]
    pub struct StopTimeUpdate {
        #[prost(message, optional, tag = "1001")]
        pub nyct_stop_time_update: Option<NyctStopTimeUpdate>,
    }

    impl RequiredFields for FeedMessage {
        fn collect_missing(&self, path: &str, missing: &mut Vec<String>) {
            nested(&self.header, path, "header", missing);
        }
    }

    impl RequiredFields for FeedHeader {
        fn collect_missing(&self, path: &str, missing: &mut Vec<String>) {
            nested(&self.nyct_feed_header, path, "nyct_feed_header", missing);
        }
    }

    impl RequiredFields for NyctFeedHeader {
        fn collect_missing(&self, path: &str, missing: &mut Vec<String>) {
            require(&self.nyct_subway_version, path, "nyct_subway_version", missing);
        }
    }
}

/// Long Island Rail Road, extension number 1005.
pub mod lirr {
    use super::*;

    #[derive(Clone, PartialEq, Message, Serialize)]
    pub struct FeedMessage {
        #[prost(message, repeated, tag = "2")]
        pub entity: Vec<FeedEntity>,
    }

    #[derive(Clone, PartialEq, Message, Serialize)]
    pub struct FeedEntity {
        #[prost(message, optional, tag = "3")]
        pub trip_update: Option<TripUpdate>,
    }

    #[derive(Clone, PartialEq, Message, Serialize)]
    pub struct TripUpdate {
        #[prost(message, repeated, tag = "2")]
        pub stop_time_update: Vec<StopTimeUpdate>,
    }

    #[derive(Clone, PartialEq, Message, Serialize)]
    pub struct StopTimeUpdate {
        #[prost(message, optional, tag = "1005")]
        pub lirr_stop_time_update: Option<RailroadStopTimeUpdate>,
    }

    impl RequiredFields for FeedMessage {
        fn collect_missing(&self, _path: &str, _missing: &mut Vec<String>) {}
    }
}

/// Metro-North Railroad, extension number 1005.
pub mod mnr {
    use super::*;

    #[derive(Clone, PartialEq, Message, Serialize)]
    pub struct FeedMessage {
        #[prost(message, repeated, tag = "2")]
        pub entity: Vec<FeedEntity>,
    }

    #[derive(Clone, PartialEq, Message, Serialize)]
    pub struct FeedEntity {
        #[prost(message, optional, tag = "3")]
        pub trip_update: Option<TripUpdate>,
    }

    #[derive(Clone, PartialEq, Message, Serialize)]
    pub struct TripUpdate {
        #[prost(message, repeated, tag = "2")]
        pub stop_time_update: Vec<StopTimeUpdate>,
    }

    #[derive(Clone, PartialEq, Message, Serialize)]
    pub struct StopTimeUpdate {
        #[prost(message, optional, tag = "1005")]
        pub mnr_stop_time_update: Option<RailroadStopTimeUpdate>,
    }

    impl RequiredFields for FeedMessage {
        fn collect_missing(&self, _path: &str, _missing: &mut Vec<String>) {}
    }
}

/// Combined MTA railroad feed, extension number 1005.
pub mod mtarr {
    use super::*;

    #[derive(Clone, PartialEq, Message, Serialize)]
    pub struct MtaRailroadCarriageDetails {
        #[prost(int32, optional, tag = "1")]
        pub bicycles_allowed: Option<i32>,
        #[prost(string, optional, tag = "2")]
        pub carriage_class: Option<String>,
        #[prost(int32, optional, tag = "3")]
        pub quiet_carriage_status: Option<i32>,
        #[prost(int32, optional, tag = "4")]
        pub toilet_facilities: Option<i32>,
    }

    #[derive(Clone, PartialEq, Message, Serialize)]
    pub struct FeedMessage {
        #[prost(message, repeated, tag = "2")]
        pub entity: Vec<FeedEntity>,
    }

    #[derive(Clone, PartialEq, Message, Serialize)]
    pub struct FeedEntity {
        #[prost(message, optional, tag = "3")]
        pub trip_update: Option<TripUpdate>,
        #[prost(message, optional, tag = "4")]
        pub vehicle: Option<VehiclePosition>,
    }

    #[derive(Clone, PartialEq, Message, Serialize)]
    pub struct TripUpdate {
        #[prost(message, repeated, tag = "2")]
        pub stop_time_update: Vec<StopTimeUpdate>,
    }

    #[derive(Clone, PartialEq, Message, Serialize)]
    pub struct StopTimeUpdate {
        #[prost(message, optional, tag = "1005")]
        pub mta_railroad_stop_time_update: Option<RailroadStopTimeUpdate>,
    }

    #[derive(Clone, PartialEq, Message, Serialize)]
    pub struct VehiclePosition {
        #[prost(message, repeated, tag = "11")]
        pub multi_carriage_details: Vec<CarriageDetails>,
    }

    #[derive(Clone, PartialEq, Message, Serialize)]
    pub struct CarriageDetails {
        #[prost(message, optional, tag = "1005")]
        pub mta_railroad_carriage_details: Option<MtaRailroadCarriageDetails>,
    }

    impl RequiredFields for FeedMessage {
        fn collect_missing(&self, _path: &str, _missing: &mut Vec<String>) {}
    }
}

/// MTA service status alerts, extension number 1001.
pub mod lmm {
    use super::*;

    #[derive(Clone, PartialEq, Message, Serialize)]
    pub struct MercuryFeedHeader {
        /// Required.
        #[prost(string, optional, tag = "1")]
        pub mercury_version: Option<String>,
    }

    #[derive(Clone, PartialEq, Message, Serialize)]
    pub struct MercuryStationAlternative {
        /// Required.
        #[prost(message, optional, tag = "1")]
        pub affected_entity: Option<rt::EntitySelector>,
        /// Required.
        #[prost(message, optional, tag = "2")]
        pub notes: Option<rt::TranslatedString>,
    }

    #[derive(Clone, PartialEq, Message, Serialize)]
    pub struct MercuryAlert {
        /// Required.
        #[prost(uint64, optional, tag = "1")]
        pub created_at: Option<u64>,
        /// Required.
        #[prost(uint64, optional, tag = "2")]
        pub updated_at: Option<u64>,
        /// Required.
        #[prost(string, optional, tag = "3")]
        pub alert_type: Option<String>,
        #[prost(message, repeated, tag = "4")]
        pub station_alternative: Vec<MercuryStationAlternative>,
        #[prost(string, repeated, tag = "5")]
        pub service_plan_number: Vec<String>,
        #[prost(string, repeated, tag = "6")]
        pub general_order_number: Vec<String>,
        #[prost(uint64, optional, tag = "7")]
        pub display_before_active: Option<u64>,
        #[prost(message, optional, tag = "8")]
        pub human_readable_active_period: Option<rt::TranslatedString>,
        #[prost(uint64, optional, tag = "9")]
        pub directionality: Option<u64>,
        #[prost(message, repeated, tag = "10")]
        pub affected_stations: Vec<rt::EntitySelector>,
        #[prost(message, optional, tag = "11")]
        pub screens_summary: Option<rt::TranslatedString>,
        #[prost(bool, optional, tag = "12")]
        pub no_affected_stations: Option<bool>,
        #[prost(string, optional, tag = "13")]
        pub clone_id: Option<String>,
    }

    #[derive(Clone, PartialEq, Message, Serialize)]
    pub struct MercuryEntitySelector {
        /// Required.
        #[prost(string, optional, tag = "1")]
        pub sort_order: Option<String>,
    }

    #[derive(Clone, PartialEq, Message, Serialize)]
    pub struct FeedMessage {
        #[prost(message, optional, tag = "1")]
        pub header: Option<FeedHeader>,
        #[prost(message, repeated, tag = "2")]
        pub entity: Vec<FeedEntity>,
    }

    #[derive(Clone, PartialEq, Message, Serialize)]
    pub struct FeedHeader {
        #[prost(message, optional, tag = "1001")]
        pub mercury_feed_header: Option<MercuryFeedHeader>,
    }

    #[derive(Clone, PartialEq, Message, Serialize)]
    pub struct FeedEntity {
        #[prost(message, optional, tag = "5")]
        pub alert: Option<Alert>,
    }

    #[derive(Clone, PartialEq, Message, Serialize)]
    pub struct Alert {
        #[prost(message, repeated, tag = "5")]
        pub informed_entity: Vec<EntitySelector>,
        #[prost(message, optional, tag = "1001")]
        pub mercury_alert: Option<MercuryAlert>,
    }

    #[derive(Clone, PartialEq, Message, Serialize)]
    pub struct EntitySelector {
        #[prost(message, optional, tag = "1001")]
        pub mercury_entity_selector: Option<MercuryEntitySelector>,
    }

    impl RequiredFields for FeedMessage {
        fn collect_missing(&self, path: &str, missing: &mut Vec<String>) {
            nested(&self.header, path, "header", missing);
            each(&self.entity, path, "entity", missing);
        }
    }

    impl RequiredFields for FeedHeader {
        fn collect_missing(&self, path: &str, missing: &mut Vec<String>) {
            nested(&self.mercury_feed_header, path, "mercury_feed_header", missing);
        }
    }

    impl RequiredFields for MercuryFeedHeader {
        fn collect_missing(&self, path: &str, missing: &mut Vec<String>) {
            require(&self.mercury_version, path, "mercury_version", missing);
        }
    }

    impl RequiredFields for FeedEntity {
        fn collect_missing(&self, path: &str, missing: &mut Vec<String>) {
            nested(&self.alert, path, "alert", missing);
        }
    }

    impl RequiredFields for Alert {
        fn collect_missing(&self, path: &str, missing: &mut Vec<String>) {
            each(&self.informed_entity, path, "informed_entity", missing);
            nested(&self.mercury_alert, path, "mercury_alert", missing);
        }
    }

    impl RequiredFields for EntitySelector {
        fn collect_missing(&self, path: &str, missing: &mut Vec<String>) {
            nested(&self.mercury_entity_selector, path, "mercury_entity_selector", missing);
        }
    }

    impl RequiredFields for MercuryEntitySelector {
        fn collect_missing(&self, path: &str, missing: &mut Vec<String>) {
            require(&self.sort_order, path, "sort_order", missing);
        }
    }

    impl RequiredFields for MercuryAlert {
        fn collect_missing(&self, path: &str, missing: &mut Vec<String>) {
            require(&self.created_at, path, "created_at", missing);
            require(&self.updated_at, path, "updated_at", missing);
            require(&self.alert_type, path, "alert_type", missing);
            each(&self.station_alternative, path, "station_alternative", missing);
            nested(&self.human_readable_active_period, path, "human_readable_active_period", missing);
            nested(&self.screens_summary, path, "screens_summary", missing);
        }
    }

    impl RequiredFields for MercuryStationAlternative {
        fn collect_missing(&self, path: &str, missing: &mut Vec<String>) {
            require(&self.affected_entity, path, "affected_entity", missing);
            require(&self.notes, path, "notes", missing);
            nested(&self.notes, path, "notes", missing);
        }
    }
}

/// Vehicle crowding estimates, extension number 1007.
pub mod crowding {
    use super::*;

    #[derive(Clone, PartialEq, Message, Serialize)]
    pub struct CrowdingDescriptor {
        #[prost(int32, optional, tag = "1")]
        pub estimated_count: Option<i32>,
        #[prost(int32, optional, tag = "2")]
        pub estimated_capacity: Option<i32>,
    }

    #[derive(Clone, PartialEq, Message, Serialize)]
    pub struct FeedMessage {
        #[prost(message, repeated, tag = "2")]
        pub entity: Vec<FeedEntity>,
    }

    #[derive(Clone, PartialEq, Message, Serialize)]
    pub struct FeedEntity {
        #[prost(message, optional, tag = "4")]
        pub vehicle: Option<VehiclePosition>,
    }

    #[derive(Clone, PartialEq, Message, Serialize)]
    pub struct VehiclePosition {
        #[prost(message, optional, tag = "1007")]
        pub crowding_descriptor: Option<CrowdingDescriptor>,
    }

    impl RequiredFields for FeedMessage {
        fn collect_missing(&self, _path: &str, _missing: &mut Vec<String>) {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::test_support::{concat, field, nyct_feed};
    use serde_json::json;

    #[test]
    fn test_merge_grafts_values_at_matching_paths() {
        let mut base = json!({
            "header": {"gtfs_realtime_version": "2.0", "timestamp": null},
            "entity": [{"id": "a"}, {"id": "b"}],
        });
        merge(
            &mut base,
            json!({
                "header": {"ext": {"version": "1.0"}},
                "entity": [{"ext": null}, {"ext": {"track": "2"}}],
            }),
        );
        assert_eq!(
            base,
            json!({
                "header": {"gtfs_realtime_version": "2.0", "timestamp": null, "ext": {"version": "1.0"}},
                "entity": [{"id": "a"}, {"id": "b", "ext": {"track": "2"}}],
            })
        );
    }

    #[test]
    fn test_nyct_values_land_on_their_messages() {
        let overlay = decode_extension(Extension::Nyct, &nyct_feed(1_741_964_966)).unwrap();
        assert!(overlay.missing.is_empty());

        let value = overlay.value;
        assert_eq!(value["header"]["nyct_feed_header"]["nyct_subway_version"], "1.0");
        let trip_update = &value["entity"][0]["trip_update"];
        assert_eq!(trip_update["trip"]["nyct_trip_descriptor"]["train_id"], "1A 0123+ 242/WTC");
        assert_eq!(
            trip_update["stop_time_update"][0]["nyct_stop_time_update"]["actual_track"],
            "2"
        );
    }

    #[test]
    fn test_nyct_header_requires_version() {
        let body = concat(
            rt::FeedMessage::default().encode_to_vec(),
            nyct::FeedMessage {
                header: Some(nyct::FeedHeader {
                    nyct_feed_header: Some(nyct::NyctFeedHeader::default()),
                }),
                entity: vec![],
            }
            .encode_to_vec(),
        );
        let overlay = decode_extension(Extension::Nyct, &body).unwrap();
        assert_eq!(
            overlay.missing,
            vec!["header.nyct_feed_header.nyct_subway_version"]
        );
    }

    #[test]
    fn test_mercury_alert_required_fields_are_walked() {
        let alert = lmm::Alert {
            informed_entity: vec![lmm::EntitySelector {
                mercury_entity_selector: Some(lmm::MercuryEntitySelector { sort_order: None }),
            }],
            mercury_alert: Some(lmm::MercuryAlert {
                created_at: Some(1_741_964_000),
                updated_at: Some(1_741_964_900),
                station_alternative: vec![lmm::MercuryStationAlternative {
                    affected_entity: Some(rt::EntitySelector::default()),
                    notes: Some(rt::TranslatedString {
                        translation: vec![rt::Translation::default()],
                    }),
                }],
                ..Default::default()
            }),
        };
        let entity = concat(
            rt::FeedEntity {
                id: Some("alert-1".into()),
                ..Default::default()
            }
            .encode_to_vec(),
            field(5, alert.encode_to_vec()),
        );
        let body = field(2, entity);

        let overlay = decode_extension(Extension::Lmm, &body).unwrap();
        assert_eq!(
            overlay.missing,
            vec![
                "entity[0].alert.informed_entity[0].mercury_entity_selector.sort_order",
                "entity[0].alert.mercury_alert.alert_type",
                "entity[0].alert.mercury_alert.station_alternative[0].notes.translation[0].text",
            ]
        );
    }

    #[test]
    fn test_mtarr_carriage_details_are_decoded() {
        let carriage = concat(
            rt::CarriageDetails {
                id: Some("7001".into()),
                ..Default::default()
            }
            .encode_to_vec(),
            mtarr::CarriageDetails {
                mta_railroad_carriage_details: Some(mtarr::MtaRailroadCarriageDetails {
                    bicycles_allowed: Some(2),
                    carriage_class: Some("Coach".into()),
                    ..Default::default()
                }),
            }
            .encode_to_vec(),
        );
        let entity = concat(
            rt::FeedEntity {
                id: Some("train-1".into()),
                ..Default::default()
            }
            .encode_to_vec(),
            field(4, field(11, carriage)),
        );

        let overlay = decode_extension(Extension::Mtarr, &field(2, entity)).unwrap();
        assert_eq!(
            overlay.value["entity"][0]["vehicle"]["multi_carriage_details"][0]
                ["mta_railroad_carriage_details"]["carriage_class"],
            "Coach"
        );
    }

    #[test]
    fn test_crowding_is_read_from_vehicle_positions() {
        let descriptor = crowding::CrowdingDescriptor {
            estimated_count: Some(42),
            estimated_capacity: Some(80),
        };
        let body = field(2, field(4, field(1007, descriptor.encode_to_vec())));

        let overlay = decode_extension(Extension::Crowding, &body).unwrap();
        assert_eq!(
            overlay.value["entity"][0]["vehicle"]["crowding_descriptor"]["estimated_count"],
            42
        );
    }

    #[test]
    fn test_wire_type_mismatch_names_the_family() {
        // estimated_count sent as a string instead of a varint.
        let body = field(2, field(4, field(1007, b"\x0a\x01x".to_vec())));
        let err = decode_extension(Extension::Crowding, &body).unwrap_err();
        assert!(matches!(err, AppError::Decode(_)));
        assert!(err.to_string().contains("CROWDING extension"));
    }
}
