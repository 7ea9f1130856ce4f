//! Client role against a simulated meter on an in-memory stream

use dlms::application::pdu::{GetResponse, SetResponse};
use dlms::application::{Apdu, Association, AssociationEvent, AssociationState};
use dlms::client::{ClientConfig, DlmsClient, ObisRead};
use dlms::hdlc::{FrameAddresses, HdlcFrame};
use dlms::transport::{FrameReader, FrameWriter};
use dlms::{DataObject, DlmsError, ObisCode, Reading, ScalerUnit};
use tokio::io::DuplexStream;

/// What the simulated meter does with a data request
enum Reply {
    Respond(Apdu),
    /// Answer, then close the link with DISC
    RespondThenDisc(Apdu),
    Ignore,
    HangUp,
}

/// Answer handshakes like a meter and data requests with `answer`
fn spawn_meter<F>(stream: DuplexStream, mut answer: F)
where
    F: FnMut(&Apdu) -> Reply + Send + 'static,
{
    tokio::spawn(async move {
        let (read_half, write_half) = tokio::io::split(stream);
        let mut reader = FrameReader::new(read_half);
        let mut writer = FrameWriter::new(write_half);
        let mut association = Association::server();

        while let Ok(Some(frames)) = reader.read_frames().await {
            for frame in frames {
                let Ok(step) = association.handle_frame(&frame) else {
                    continue;
                };
                if let Some(reply) = step.reply {
                    writer.send(&reply).await.unwrap();
                }
                if let AssociationEvent::Data(request) = step.event {
                    match answer(&request) {
                        Reply::Respond(response) => {
                            let frame = association.request_frame(&response).unwrap();
                            writer.send(&frame).await.unwrap();
                        }
                        Reply::RespondThenDisc(response) => {
                            let frame = association.request_frame(&response).unwrap();
                            writer.send(&frame).await.unwrap();
                            writer.send(&HdlcFrame::disc(FrameAddresses::METER_TO_CLIENT)).await.unwrap();
                            association = Association::server();
                        }
                        Reply::Ignore => {}
                        Reply::HangUp => return,
                    }
                }
            }
        }
    });
}

fn voltage_reading() -> DataObject {
    DataObject::Reading(Reading::new(DataObject::Unsigned16(2300), ScalerUnit::new(-1, 35)))
}

fn answer_voltage(request: &Apdu) -> Reply {
    match request {
        Apdu::GetRequest(get) => Reply::Respond(Apdu::GetResponse(GetResponse::data(get.invoke_id, voltage_reading()))),
        _ => Reply::Ignore,
    }
}

async fn associated_client<F>(answer: F) -> DlmsClient
where
    F: FnMut(&Apdu) -> Reply + Send + 'static,
{
    let (client_end, meter_end) = tokio::io::duplex(4096);
    spawn_meter(meter_end, answer);
    let client = DlmsClient::with_stream(Box::new(client_end), ClientConfig::default());
    client.associate().await.unwrap();
    client
}

#[tokio::test]
async fn test_associate_with_meter() {
    let client = associated_client(|_| Reply::Ignore).await;
    assert_eq!(client.state().await, AssociationState::Associated);
}

#[tokio::test]
async fn test_read_scaled_voltage() {
    let client = associated_client(answer_voltage).await;

    let value = client.read_obis("1-0:32.7.0.255", 3, 2).await.unwrap();
    assert_eq!(value.as_f64(), Some(230.0));
    assert_eq!(client.pending_requests(), 0);
}

#[tokio::test]
async fn test_read_refused_by_meter() {
    let client = associated_client(|request| match request {
        Apdu::GetRequest(get) => Reply::Respond(Apdu::GetResponse(GetResponse::error(get.invoke_id, 0x01))),
        _ => Reply::Ignore,
    })
    .await;

    let err = client.read_obis("0-0:96.1.0.255", 1, 2).await.unwrap_err();
    assert_eq!(err, DlmsError::DataAccessError(1));
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_read_times_out() {
    let client = associated_client(|_| Reply::Ignore).await;

    let err = client.read_obis("1-0:32.7.0.255", 3, 2).await.unwrap_err();
    assert_eq!(err, DlmsError::Timeout);
    assert_eq!(client.pending_requests(), 0);
}

#[tokio::test]
async fn test_read_multiple_keeps_order() {
    let client = associated_client(|request| match request {
        Apdu::GetRequest(get) if get.descriptor.obis == ObisCode::new(1, 0, 1, 8, 0, 255) => {
            Reply::Respond(Apdu::GetResponse(GetResponse::error(get.invoke_id, 0x04)))
        }
        other => answer_voltage(other),
    })
    .await;

    let voltage = ObisCode::new(1, 0, 32, 7, 0, 255);
    let energy = ObisCode::new(1, 0, 1, 8, 0, 255);
    let results = client
        .read_multiple(&[ObisRead::register(energy), ObisRead::register(voltage)])
        .await;

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].0, energy);
    assert_eq!(results[0].1, Err(DlmsError::DataAccessError(4)));
    assert_eq!(results[1].0, voltage);
    assert_eq!(results[1].1.as_ref().map(DataObject::as_f64), Ok(Some(230.0)));
}

#[tokio::test]
async fn test_write_confirmed() {
    let client = associated_client(|request| match request {
        Apdu::SetRequest(set) => Reply::Respond(Apdu::SetResponse(SetResponse {
            invoke_id: set.invoke_id,
            // type mismatch unless the value went out as long-unsigned
            result: if set.value == DataObject::Unsigned16(900) { 0 } else { 12 },
        })),
        _ => Reply::Ignore,
    })
    .await;

    client.write_obis("1-0:94.91.0.255", 3, 2, 900u64).await.unwrap();
}

#[tokio::test]
async fn test_release_then_associate_again() {
    let client = associated_client(answer_voltage).await;

    client.release().await.unwrap();
    assert!(!client.state().await.is_active());

    client.associate().await.unwrap();
    let value = client.read_obis("1-0:32.7.0.255", 3, 2).await.unwrap();
    assert_eq!(value.as_f64(), Some(230.0));
}

#[tokio::test]
async fn test_meter_hangup_fails_pending_read() {
    let client = associated_client(|_| Reply::HangUp).await;

    let err = client.read_obis("1-0:32.7.0.255", 3, 2).await.unwrap_err();
    assert!(matches!(err, DlmsError::Transport(_)), "got {:?}", err);
    assert_eq!(client.pending_requests(), 0);

    assert!(client.is_closed());
    assert_eq!(client.state().await, AssociationState::Disconnected);
    let err = client.read_obis("1-0:32.7.0.255", 3, 2).await.unwrap_err();
    assert!(matches!(err, DlmsError::Transport(_)), "got {:?}", err);
    assert!(matches!(client.associate().await, Err(DlmsError::Transport(_))));
}

#[tokio::test]
async fn test_reassociate_after_meter_disc() {
    let mut disconnected = false;
    let client = associated_client(move |request| match request {
        Apdu::GetRequest(get) if !disconnected => {
            disconnected = true;
            Reply::RespondThenDisc(Apdu::GetResponse(GetResponse::data(get.invoke_id, voltage_reading())))
        }
        other => answer_voltage(other),
    })
    .await;

    let value = client.read_obis("1-0:32.7.0.255", 3, 2).await.unwrap();
    assert_eq!(value.as_f64(), Some(230.0));

    for _ in 0..100 {
        if !client.state().await.is_active() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(client.state().await, AssociationState::Disconnected);

    client.associate().await.unwrap();
    let value = client.read_obis("1-0:32.7.0.255", 3, 2).await.unwrap();
    assert_eq!(value.as_f64(), Some(230.0));
}
