fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::fs;
    use std::path::PathBuf;

    use geoqueue_protocol::constants::{TRIGGER_START_BULK_DELETE, TRIGGER_START_BULK_IMPORT};
    use geoqueue_protocol::events::ItemImported;
    use geoqueue_protocol::{
        BulkDeleteTrigger, BulkImportTrigger, Frame, JobEvent, JobFailed, JobProgress, ModuleName,
        QueueEvent,
    };

    /// Returns the path to the fixtures directory.
    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    fn read_fixture(name: &str) -> String {
        let path = fixtures_dir().join(name);
        fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()))
    }

    fn load_frame(name: &str) -> Frame {
        serde_json::from_str(&read_fixture(name))
            .unwrap_or_else(|e| panic!("failed to parse frame {name}: {e}"))
    }

    /// Normalizes JSON values so that integer-valued floats compare equal.
    ///
    /// Servers may send `65` where Rust serializes `65.0`.
    fn normalize_value(v: &serde_json::Value) -> serde_json::Value {
        match v {
            serde_json::Value::Number(n) => {
                if let Some(f) = n.as_f64() {
                    serde_json::json!(f)
                } else {
                    v.clone()
                }
            }
            serde_json::Value::Object(map) => {
                let normalized: serde_json::Map<String, serde_json::Value> = map
                    .iter()
                    .map(|(k, v)| (k.clone(), normalize_value(v)))
                    .collect();
                serde_json::Value::Object(normalized)
            }
            serde_json::Value::Array(arr) => {
                serde_json::Value::Array(arr.iter().map(normalize_value).collect())
            }
            _ => v.clone(),
        }
    }

    fn assert_same_json(name: &str, expected: &serde_json::Value, actual: &serde_json::Value) {
        assert_eq!(
            normalize_value(expected),
            normalize_value(actual),
            "mismatch for {name}:\n  wire: {expected}\n  rust: {actual}"
        );
    }

    /// Parses a fixture as a frame, re-encodes it, and compares the JSON.
    fn frame_roundtrip(name: &str) {
        let raw = read_fixture(name);
        let frame = load_frame(name);
        let expected: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let actual: serde_json::Value = serde_json::from_str(&frame.to_json().unwrap()).unwrap();
        assert_same_json(name, &expected, &actual);
    }

    /// Decodes a fixture's payload into `T`, re-encodes it, and compares.
    fn payload_roundtrip<T>(name: &str)
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
    {
        let frame = load_frame(name);
        let raw = frame.data.as_ref().expect("fixture has a payload").get();
        let parsed: T = serde_json::from_str(raw)
            .unwrap_or_else(|e| panic!("failed to deserialize payload of {name}: {e}"));
        let expected: serde_json::Value = serde_json::from_str(raw).unwrap();
        let actual = serde_json::to_value(&parsed).unwrap();
        assert_same_json(name, &expected, &actual);
    }

    const ALL_FIXTURES: [&str; 13] = [
        "ping.json",
        "queue_refresh.json",
        "queue_initial_state.json",
        "queue_items_deleted.json",
        "queue_item_imported.json",
        "delete_started.json",
        "upload_status_updated.json",
        "bulk_delete_started.json",
        "bulk_delete_completed.json",
        "bulk_import_status_updated.json",
        "bulk_import_failed.json",
        "start_bulk_delete.json",
        "start_bulk_import.json",
    ];

    // --- Envelope ---

    #[test]
    fn every_fixture_roundtrips_as_frame() {
        for name in ALL_FIXTURES {
            frame_roundtrip(name);
        }
    }

    #[test]
    fn keepalive_and_refresh_frames_match_builders() {
        let ping = load_frame("ping.json");
        assert!(ping.is_keepalive());
        assert_eq!(ping.to_json().unwrap(), Frame::ping().to_json().unwrap());

        let refresh = load_frame("queue_refresh.json");
        assert_eq!(
            refresh.to_json().unwrap(),
            Frame::refresh(ModuleName::Queue).to_json().unwrap()
        );
    }

    // --- Queue module ---

    #[test]
    fn queue_snapshot_decodes() {
        let QueueEvent::InitialState(snapshot) =
            QueueEvent::decode(&load_frame("queue_initial_state.json")).unwrap()
        else {
            panic!("expected initial_state");
        };
        assert_eq!(snapshot.items.len(), 2);
        assert_eq!(snapshot.items[0].file_size, Some(183_201));
        assert_eq!(snapshot.items[1].record_count, Some(1204));
        assert!(snapshot.items[1].created_at.is_some());
    }

    #[test]
    fn queue_removals_and_imports_decode() {
        let QueueEvent::ItemsDeleted(deleted) =
            QueueEvent::decode(&load_frame("queue_items_deleted.json")).unwrap()
        else {
            panic!("expected items_deleted");
        };
        assert_eq!(deleted.item_ids, vec![1, 2, 3]);

        payload_roundtrip::<ItemImported>("queue_item_imported.json");
    }

    // --- Job modules ---

    #[test]
    fn numeric_job_id_and_request_echo_decode() {
        let frame = load_frame("bulk_delete_started.json");
        let event = JobEvent::decode(ModuleName::BulkDelete, &frame).unwrap();
        assert_eq!(event.job_id(), "918");
        assert_eq!(event.targets(), BTreeSet::from([1, 2, 3]));
        let JobEvent::Started(started) = event else {
            panic!("expected started");
        };
        assert_eq!(
            started.request_id.as_deref(),
            Some("5b0c7e52-9a4f-4b7e-9a61-1f7f4f5d2c11")
        );

        // The terminal event refers to the same job with a string id.
        let completed =
            JobEvent::decode(ModuleName::BulkDelete, &load_frame("bulk_delete_completed.json"))
                .unwrap();
        assert_eq!(completed.job_id(), "918");
    }

    #[test]
    fn progress_payloads_roundtrip() {
        payload_roundtrip::<JobProgress>("upload_status_updated.json");
        payload_roundtrip::<JobProgress>("bulk_import_status_updated.json");

        let progress: JobProgress = load_frame("bulk_import_status_updated.json")
            .parse_data()
            .unwrap()
            .unwrap();
        assert_eq!(progress.completed_item_ids, vec![6, 4]);
        assert_eq!(progress.current_item_id, Some(5));
    }

    #[test]
    fn failure_payload_carries_error_text() {
        payload_roundtrip::<JobFailed>("bulk_import_failed.json");
        let JobEvent::Failed(failed) =
            JobEvent::decode(ModuleName::BulkImport, &load_frame("bulk_import_failed.json")).unwrap()
        else {
            panic!("expected failed");
        };
        assert_eq!(failed.message(), "invalid geometry in row 17");
    }

    #[test]
    fn job_modules_reject_queue_vocabulary() {
        let frame = load_frame("queue_items_deleted.json");
        assert!(JobEvent::decode(ModuleName::Delete, &frame).is_err());
    }

    // --- Outbound triggers ---

    #[test]
    fn bulk_triggers_match_wire_shape() {
        let delete = Frame::for_module(
            ModuleName::BulkDelete,
            TRIGGER_START_BULK_DELETE,
            Some(&BulkDeleteTrigger {
                request_id: "r-1".into(),
                item_ids: vec![1, 2, 3],
            }),
        )
        .unwrap();
        let expected: serde_json::Value =
            serde_json::from_str(&read_fixture("start_bulk_delete.json")).unwrap();
        let actual: serde_json::Value = serde_json::from_str(&delete.to_json().unwrap()).unwrap();
        assert_same_json("start_bulk_delete.json", &expected, &actual);

        let import = Frame::for_module(
            ModuleName::BulkImport,
            TRIGGER_START_BULK_IMPORT,
            Some(&BulkImportTrigger {
                request_id: "r-2".into(),
                item_ids: vec![4, 5],
                options: serde_json::json!({"srid": 4326}),
            }),
        )
        .unwrap();
        let expected: serde_json::Value =
            serde_json::from_str(&read_fixture("start_bulk_import.json")).unwrap();
        let actual: serde_json::Value = serde_json::from_str(&import.to_json().unwrap()).unwrap();
        assert_same_json("start_bulk_import.json", &expected, &actual);
    }
}
