use std::sync::Arc;

use gatelink_controller::simulated::{Op, SimulatedGate};
use gatelink_controller::{
    AuthSession, ControllerConfig, Error, MAX_KEY_COUNT, ManagementClient, ManagementError, ProtocolError,
    SoftwareKeyStore, TransportError, own_key_record,
};
use gatelink_proto::{KeyRecord, ParamId, Slot, Status, commands};

async fn session(admin: bool) -> (SimulatedGate, AuthSession<SimulatedGate>) {
    let keys = Arc::new(SoftwareKeyStore::generate().unwrap());
    let gate = SimulatedGate::new();
    gate.add_key(own_key_record(keys.as_ref(), admin).unwrap());
    let mut session = AuthSession::new("gate-1", gate.clone(), keys, &ControllerConfig::default());
    session.authenticate().await.unwrap();
    gate.clear_journal();
    (gate, session)
}

fn get_key_indices(gate: &SimulatedGate) -> Vec<u32> {
    let journal = gate.journal();
    let mut indices = Vec::new();
    let mut pending = None;
    for op in journal {
        match op {
            Op::Write(Slot::ManagementParamVal, data, _) => {
                pending = Some(u32::from_le_bytes(data.try_into().unwrap()));
            }
            Op::Write(Slot::Management, data, _) if data == [commands::GET_KEY] => {
                indices.push(pending.take().unwrap());
            }
            _ => {}
        }
    }
    indices
}

#[tokio::test(start_paused = true)]
async fn enumerates_exactly_the_reported_count() {
    let (gate, mut session) = session(true).await;
    gate.add_key(KeyRecord::ed25519([1; 32], false));
    gate.add_key(KeyRecord::ed25519([2; 32], true));

    let listing = ManagementClient::new(&mut session).list_keys().await.unwrap();
    assert_eq!(listing.total, 3);
    assert_eq!(listing.keys.len(), 3);
    assert!(listing.is_complete());
    assert_eq!(listing.records().copied().collect::<Vec<_>>(), gate.keys());
    assert_eq!(get_key_indices(&gate), vec![0, 1, 2]);
}

#[tokio::test(start_paused = true)]
async fn failing_index_does_not_stop_enumeration() {
    let (gate, mut session) = session(true).await;
    gate.add_key(KeyRecord::ed25519([1; 32], false));
    gate.add_key(KeyRecord::ed25519([2; 32], false));
    gate.fail_get_key(1, Status::FlashError);

    let listing = ManagementClient::new(&mut session).list_keys().await.unwrap();
    assert_eq!(get_key_indices(&gate), vec![0, 1, 2]);
    assert_eq!(listing.total, 3);
    assert_eq!(listing.keys.iter().map(|k| k.index).collect::<Vec<_>>(), vec![0, 2]);

    let failure = listing.first_error.unwrap();
    assert_eq!(failure.index, 1);
    assert_eq!(failure.error.management(), Some(ManagementError::FlashError));
}

#[tokio::test(start_paused = true)]
async fn failing_first_index_still_learns_the_count() {
    let (gate, mut session) = session(true).await;
    gate.add_key(KeyRecord::ed25519([1; 32], false));
    gate.fail_get_key(0, Status::InvalidOperation);

    let listing = ManagementClient::new(&mut session).list_keys().await.unwrap();
    assert_eq!(listing.total, 2);
    assert_eq!(listing.keys.len(), 1);
    assert_eq!(listing.keys[0].index, 1);
    assert_eq!(listing.first_error.unwrap().index, 0);
}

#[tokio::test(start_paused = true)]
async fn empty_device_lists_nothing() {
    let keys = Arc::new(SoftwareKeyStore::generate().unwrap());
    let gate = SimulatedGate::new();
    gate.set_prog_mode(true);
    let mut session = AuthSession::new("gate-1", gate.clone(), keys, &ControllerConfig::default());
    assert!(session.authenticate().await.unwrap().admin);
    gate.clear_journal();

    let listing = ManagementClient::new(&mut session).list_keys().await.unwrap();
    assert_eq!(listing.total, 0);
    assert!(listing.keys.is_empty());
    assert!(listing.is_complete());
    assert_eq!(get_key_indices(&gate), vec![0]);
}

#[tokio::test(start_paused = true)]
async fn inflated_count_stops_after_missing_run() {
    let (gate, mut session) = session(true).await;
    gate.override_value(Slot::ManagementParamVal, u32::MAX.to_le_bytes().to_vec());

    let listing = ManagementClient::new(&mut session).list_keys().await.unwrap();
    assert_eq!(listing.total, u32::MAX);
    assert_eq!(listing.keys.len(), 1);
    assert_eq!(get_key_indices(&gate), vec![0, 1, 2, 3, 4]);

    let failure = listing.first_error.unwrap();
    assert_eq!(failure.index, 1);
    assert_eq!(failure.error.management(), Some(ManagementError::NotFound));
}

#[tokio::test(start_paused = true)]
async fn enumeration_is_capped() {
    let (gate, mut session) = session(true).await;
    gate.override_value(Slot::ManagementParamVal, u32::MAX.to_le_bytes().to_vec());
    for index in 1..MAX_KEY_COUNT + 8 {
        gate.fail_get_key(index, Status::FlashError);
    }

    let listing = ManagementClient::new(&mut session).list_keys().await.unwrap();
    let indices = get_key_indices(&gate);
    assert_eq!(indices.len() as u32, MAX_KEY_COUNT);
    assert_eq!(indices.last(), Some(&(MAX_KEY_COUNT - 1)));
    assert_eq!(listing.first_error.unwrap().error.management(), Some(ManagementError::FlashError));
}

#[tokio::test(start_paused = true)]
async fn link_failure_aborts_enumeration() {
    let (gate, mut session) = session(true).await;
    gate.add_key(KeyRecord::ed25519([1; 32], false));
    gate.fail_slot(Slot::ManagementKey, TransportError::Disconnected);

    let err = ManagementClient::new(&mut session).list_keys().await.unwrap_err();
    assert!(matches!(err, Error::Transport(TransportError::Disconnected)));
    assert_eq!(get_key_indices(&gate), vec![0]);
}

#[tokio::test(start_paused = true)]
async fn corrupt_record_is_reported_per_index() {
    let (gate, mut session) = session(true).await;
    gate.add_key(KeyRecord::ed25519([1; 32], false));
    gate.override_value(Slot::ManagementKey, vec![0; 33]);

    let listing = ManagementClient::new(&mut session).list_keys().await.unwrap();
    assert_eq!(listing.total, 2);
    assert!(listing.keys.is_empty());
    let failure = listing.first_error.unwrap();
    assert_eq!(failure.index, 0);
    assert!(matches!(
        failure.error,
        Error::Protocol(ProtocolError::InvalidData { slot: Slot::ManagementKey, .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn non_admin_session_never_touches_the_link() {
    let (gate, mut session) = session(false).await;
    let mut mgmt = ManagementClient::new(&mut session);

    let record = KeyRecord::ed25519([1; 32], false);
    let not_admin = Some(ManagementError::NotAdmin);
    assert_eq!(mgmt.add_key(&record).await.unwrap_err().management(), not_admin);
    assert_eq!(mgmt.add_key_bytes(&[1; 3]).await.unwrap_err().management(), not_admin);
    assert_eq!(mgmt.delete_key(&record).await.unwrap_err().management(), not_admin);
    assert_eq!(mgmt.get_key(0).await.unwrap_err().management(), not_admin);
    assert_eq!(mgmt.list_keys().await.unwrap_err().management(), not_admin);
    assert_eq!(mgmt.set_param(ParamId::CLOSE_DELAY, 1).await.unwrap_err().management(), not_admin);
    assert_eq!(mgmt.get_param(ParamId::CLOSE_DELAY).await.unwrap_err().management(), not_admin);
    assert_eq!(mgmt.set_name("x").await.unwrap_err().management(), not_admin);
    assert_eq!(mgmt.name().await.unwrap_err().management(), not_admin);
    assert_eq!(mgmt.audit_log().await.unwrap_err().management(), not_admin);

    assert!(gate.journal().is_empty());
}

#[tokio::test(start_paused = true)]
async fn set_param_writes_id_then_value_then_trigger() {
    let (gate, mut session) = session(true).await;
    ManagementClient::new(&mut session)
        .set_param(ParamId::OBSTACLE_TIMEOUT, 0x0102_0304)
        .await
        .unwrap();

    let writes: Vec<(Slot, Vec<u8>)> = gate
        .journal()
        .into_iter()
        .filter_map(|op| match op {
            Op::Write(slot, data, _) => Some((slot, data)),
            Op::Read(_) => None,
        })
        .collect();
    assert_eq!(
        writes,
        vec![
            (Slot::ManagementParamId, vec![4]),
            (Slot::ManagementParamVal, vec![0x04, 0x03, 0x02, 0x01]),
            (Slot::Management, vec![commands::SET_PARAM]),
        ]
    );
    assert_eq!(gate.param(ParamId::OBSTACLE_TIMEOUT), Some(0x0102_0304));
}

#[tokio::test(start_paused = true)]
async fn audit_log_records_each_attempt() {
    let (gate, mut session) = session(true).await;
    session.authenticate().await.unwrap();

    let entries = ManagementClient::new(&mut session).audit_log().await.unwrap();
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| e.success));
    assert_eq!(entries, gate.audit_entries());
}
