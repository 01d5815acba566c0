//! Integration tests for the kidlink-core frame codec.
//!
//! These tests go through the public API only and check the things the parent
//! UI relies on: discriminators, camelCase field names, optional fields that
//! disappear when absent, and frames surviving encode → decode intact.

use chrono::{TimeZone, Utc};
use kidlink_core::{
    decode_frame, encode_frame,
    protocol::{
        messages::{
            AppUsageEntry, AppUsageResponseMessage, Command, CommandKind, ComprehensiveUpdate,
            DeviceInfo, Location, NetworkInfo, NetworkType, Photo, Usage,
        },
        SequenceCounter,
    },
    ControlMessage, Frame, Payload, PermissionKind, PermissionSet, TelemetryMessage,
};
use serde_json::{json, Value};
use uuid::Uuid;

fn device_info() -> DeviceInfo {
    DeviceInfo {
        battery: 87,
        storage: Usage {
            total: 64_000,
            used: 12_000,
        },
        memory: Usage {
            total: 4096,
            used: 1024,
        },
        network: NetworkInfo {
            kind: NetworkType::Wifi,
            strength: 4,
        },
    }
}

fn comprehensive(location: Option<Location>, photos: Option<Vec<Photo>>) -> TelemetryMessage {
    let mut permissions = PermissionSet::new();
    permissions.set(PermissionKind::Location, location.is_some());
    permissions.set(PermissionKind::Gallery, photos.is_some());
    TelemetryMessage::ComprehensiveUpdate(ComprehensiveUpdate {
        timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
        device_info: device_info(),
        app_usage: vec![AppUsageEntry {
            name: "Messages".to_string(),
            time_spent: 42,
            last_used: 1_714_550_000_000,
        }],
        permissions,
        location,
        recent_photos: photos,
    })
}

fn to_json(frame: &Frame) -> Value {
    serde_json::from_slice(&encode_frame(frame).expect("encode")).expect("valid json")
}

#[test]
fn test_comprehensive_update_wire_shape_without_optional_fields() {
    // Arrange
    let frame = Frame {
        sequence: 0,
        payload: Payload::Telemetry(comprehensive(None, None)),
    };

    // Act
    let value = to_json(&frame);
    let body = &value["payload"]["body"];

    // Assert
    assert_eq!(body["type"], "comprehensive_update");
    assert_eq!(body["timestamp"], "2024-05-01T10:00:00Z");
    assert_eq!(body["deviceInfo"]["network"]["type"], "wifi");
    assert_eq!(body["appUsage"][0]["timeSpent"], 42);
    assert_eq!(body["appUsage"][0]["lastUsed"], 1_714_550_000_000_i64);
    assert_eq!(body["permissions"]["location"], false);
    assert!(body.get("location").is_none(), "absent location must be omitted");
    assert!(body.get("recentPhotos").is_none(), "absent photos must be omitted");
}

#[test]
fn test_comprehensive_update_with_location_and_photos_survives_roundtrip() {
    let location = Location {
        latitude: 37.75,
        longitude: -122.5,
        accuracy: 5.0,
        timestamp: 1_714_550_000_000,
    };
    let photos = vec![Photo {
        id: "p1".to_string(),
        filename: "IMG_0001.JPG".to_string(),
        uri: "file:///photos/IMG_0001.JPG".to_string(),
        creation_time: 1_714_540_000_000,
        width: 4032,
        height: 3024,
    }];
    let frame = Frame {
        sequence: 9,
        payload: Payload::Telemetry(comprehensive(Some(location), Some(photos))),
    };

    let value = to_json(&frame);
    assert_eq!(value["payload"]["body"]["recentPhotos"][0]["creationTime"], 1_714_540_000_000_i64);

    let decoded = decode_frame(&encode_frame(&frame).unwrap()).unwrap();
    assert_eq!(decoded, frame);
}

#[test]
fn test_command_frame_keeps_command_discriminator_and_params() {
    let mut params = serde_json::Map::new();
    params.insert("quality".to_string(), json!("high"));
    let frame = Frame {
        sequence: 1,
        payload: Payload::Command(Command::new("capture_photo", params)),
    };

    let value = to_json(&frame);
    assert_eq!(value["payload"]["kind"], "command");
    assert_eq!(value["payload"]["body"]["command"], "capture_photo");
    assert_eq!(value["payload"]["body"]["params"]["quality"], "high");

    let decoded = decode_frame(&encode_frame(&frame).unwrap()).unwrap();
    let Payload::Command(command) = decoded.payload else {
        panic!("expected a command payload");
    };
    assert_eq!(command.kind(), Ok(CommandKind::CapturePhoto));
}

#[test]
fn test_negotiation_exchange_roundtrips_with_sequence_numbers() {
    let counter = SequenceCounter::new();
    let request_id = Uuid::new_v4();
    let frames = [
        Frame {
            sequence: counter.next(),
            payload: ControlMessage::PermissionRequest {
                request_id,
                permission: PermissionKind::Camera,
            }
            .into(),
        },
        Frame {
            sequence: counter.next(),
            payload: ControlMessage::PermissionResponse {
                request_id,
                permission: PermissionKind::Camera,
                granted: true,
            }
            .into(),
        },
    ];

    for frame in &frames {
        let decoded = decode_frame(&encode_frame(frame).unwrap()).unwrap();
        assert_eq!(&decoded, frame);
    }
    assert_eq!(frames[1].sequence, 1);
}

#[test]
fn test_app_usage_response_uses_camel_case_app_usage_key() {
    let frame = Frame {
        sequence: 2,
        payload: Payload::Telemetry(TelemetryMessage::AppUsageResponse(
            AppUsageResponseMessage {
                timestamp: Utc::now(),
                app_usage: Vec::new(),
            },
        )),
    };
    let value = to_json(&frame);
    assert_eq!(value["payload"]["body"]["type"], "app_usage_response");
    assert!(value["payload"]["body"]["appUsage"].is_array());
}

#[test]
fn test_decoding_a_frame_written_by_hand() {
    // A frame as another implementation would produce it.
    let raw = json!({
        "sequence": 12,
        "payload": {
            "kind": "telemetry",
            "body": {
                "type": "permission_update",
                "timestamp": "2024-05-01T10:00:00.250Z",
                "permission": { "type": "gallery", "granted": false }
            }
        }
    });
    let frame = decode_frame(raw.to_string().as_bytes()).unwrap();
    assert_eq!(frame.sequence, 12);
    match frame.payload {
        Payload::Telemetry(TelemetryMessage::PermissionUpdate(update)) => {
            assert_eq!(update.permission.kind, PermissionKind::Gallery);
            assert!(!update.permission.granted);
        }
        other => panic!("unexpected payload {other:?}"),
    }
}
