use basal_core::{timestamp, BasalError, DeliveryType, ReconcileConfig, Segment};
use chrono::{TimeZone, Utc};
use serde_json::json;

#[test]
fn accepts_every_timestamp_form() {
    let segment: Segment = serde_json::from_value(json!({
        "type": "basal-rate-segment",
        "deliveryType": "scheduled",
        "start": "2014-03-06T01:00:00",
        "end": 1394071200000_i64,
        "value": 0.8
    }))
    .expect("Could not read segment");

    assert_eq!(segment.start, Some(Utc.with_ymd_and_hms(2014, 3, 6, 1, 0, 0).unwrap()));
    assert_eq!(segment.end, Some(Utc.with_ymd_and_hms(2014, 3, 6, 2, 0, 0).unwrap()));

    let offset: Segment = serde_json::from_value(json!({
        "deliveryType": "temp",
        "start": "2014-03-06T03:00:00+02:00",
        "end": null
    }))
    .expect("Could not read segment");
    assert_eq!(offset.start, Some(Utc.with_ymd_and_hms(2014, 3, 6, 1, 0, 0).unwrap()));
    assert_eq!(offset.end, None);
    assert_eq!(offset.kind, "basal-rate-segment");
}

#[test]
fn rejects_unreadable_timestamps() {
    let result = serde_json::from_value::<Segment>(json!({
        "deliveryType": "scheduled",
        "start": "yesterday"
    }));
    assert!(result.is_err());
}

#[test]
fn writes_canonical_millisecond_timestamps() {
    let at = Utc.with_ymd_and_hms(2014, 2, 12, 6, 0, 0).unwrap();
    assert_eq!(timestamp::format(at), "2014-02-12T06:00:00.000Z");

    let segment = Segment::new(DeliveryType::Temp, at, at, Some(1.0));
    let value = serde_json::to_value(&segment).expect("Could not serialize segment");

    assert_eq!(value["start"], "2014-02-12T06:00:00.000Z");
    assert_eq!(value["deliveryType"], "temp");
    assert!(value.get("suppressed").is_none());
    assert!(value.get("percent").is_none());
}

#[test]
fn unknown_delivery_types_keep_their_tag() {
    let segment: Segment = serde_json::from_value(json!({
        "deliveryType": "automated-bolus",
        "start": 0,
        "end": 1000,
        "contiguousWith": "segment_3"
    }))
    .expect("Could not read segment");

    assert_eq!(
        segment.delivery_type,
        DeliveryType::Other("automated-bolus".to_string())
    );
    assert_eq!(segment.link.as_deref(), Some("segment_3"));

    let value = serde_json::to_value(&segment).expect("Could not serialize segment");
    assert_eq!(value["deliveryType"], "automated-bolus");
    assert_eq!(value["link"], "segment_3");
}

#[test]
fn smooshable_requires_matching_payload() {
    let at = |h| Utc.with_ymd_and_hms(2014, 3, 6, h, 0, 0).unwrap();
    let first = Segment::new(DeliveryType::Scheduled, at(0), at(1), Some(0.5)).with_device("pump");
    let second = Segment::new(DeliveryType::Scheduled, at(1), at(2), Some(0.5)).with_device("pump");
    let other_pump = second.clone().with_device("other");

    assert!(first.abuts(&second));
    assert!(first.is_smooshable_with(&second));
    assert!(!first.is_smooshable_with(&other_pump));
}

#[test]
fn bounds_report_what_is_wrong() {
    let at = |h| Utc.with_ymd_and_hms(2014, 3, 6, h, 0, 0).unwrap();
    let inverted = Segment::new(DeliveryType::Scheduled, at(2), at(1), None);

    assert!(matches!(
        inverted.bounds(),
        Err(BasalError::MalformedInterval {
            reason: "end precedes start"
        })
    ));
    assert!(matches!(
        Segment::default().bounds(),
        Err(BasalError::MalformedInterval {
            reason: "missing start"
        })
    ));
}

#[test]
fn default_priority_is_temp_then_suspend() {
    let config = ReconcileConfig::default();
    assert_eq!(config.priority, vec![DeliveryType::Temp, DeliveryType::Suspend]);

    let parsed: ReconcileConfig = serde_json::from_value(json!({
        "priority": ["suspend", "temp"],
        "max_resolution_steps": 50
    }))
    .expect("Could not read config");
    assert_eq!(parsed.priority, vec![DeliveryType::Suspend, DeliveryType::Temp]);
    assert_eq!(parsed.max_resolution_steps, 50);
}
