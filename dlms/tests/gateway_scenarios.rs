//! Gateway role: a simulated meter dials in over an in-memory stream

use dlms::application::pdu::{AarqApdu, GetResponse};
use dlms::application::{Apdu, Authentication, MeterCommand};
use dlms::hdlc::{FrameAddresses, FrameType, HdlcFrame, LinkParameters};
use dlms::server::{ChannelTelemetrySink, ConnectionRegistry, ServerConfig, ServerListener, StaticMeterDirectory, Telemetry};
use dlms::transport::{FrameReader, FrameWriter};
use dlms::{DataObject, DlmsError, ObisCode, Reading, ScalerUnit};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::io::{DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::mpsc::UnboundedReceiver;

const METER: FrameAddresses = FrameAddresses::CLIENT_TO_METER;

/// Meter side of a dialed-in connection
struct DialingMeter {
    reader: FrameReader<ReadHalf<DuplexStream>>,
    writer: FrameWriter<WriteHalf<DuplexStream>>,
    received: VecDeque<HdlcFrame>,
}

impl DialingMeter {
    async fn send(&mut self, frame: HdlcFrame) {
        self.writer.send(&frame).await.unwrap();
    }

    async fn next_frame(&mut self) -> HdlcFrame {
        loop {
            if let Some(frame) = self.received.pop_front() {
                return frame;
            }
            let frames = tokio::time::timeout(Duration::from_secs(5), self.reader.read_frames())
                .await
                .expect("gateway did not answer")
                .unwrap()
                .expect("gateway closed the connection");
            self.received.extend(frames);
        }
    }

    async fn next_apdu(&mut self) -> Apdu {
        let frame = self.next_frame().await;
        assert_eq!(frame.frame_type(), FrameType::Information);
        Apdu::decode(frame.apdu()).unwrap()
    }

    /// SNRM then AARQ carrying `number` as calling title
    async fn log_on(&mut self, number: &str) {
        self.send(HdlcFrame::snrm(METER, LinkParameters::proposal().encode())).await;
        let ua = self.next_frame().await;
        assert_eq!(ua.frame_type(), FrameType::UnnumberedAcknowledge);

        let aarq = AarqApdu::with_calling_title(Authentication::None, number.as_bytes());
        self.send(HdlcFrame::information(METER, aarq.encode())).await;
        match self.next_apdu().await {
            Apdu::Aare(aare) => assert!(aare.is_accepted()),
            other => panic!("expected AARE, got {:?}", other),
        }
    }
}

fn gateway() -> (ServerListener, UnboundedReceiver<Telemetry>) {
    let mut directory = StaticMeterDirectory::new();
    directory.insert("MTR0001", "meter-1", None);
    directory.insert("MTR0002", "meter-2", None);
    let (sink, telemetry) = ChannelTelemetrySink::new();
    let listener = ServerListener::new(ServerConfig::default(), std::sync::Arc::new(directory), std::sync::Arc::new(sink));
    (listener, telemetry)
}

fn dial_in(listener: &ServerListener, peer: &str) -> DialingMeter {
    let (meter_end, gateway_end) = tokio::io::duplex(4096);
    listener.spawn_connection(gateway_end, peer.parse().unwrap());
    let (read_half, write_half) = tokio::io::split(meter_end);
    DialingMeter {
        reader: FrameReader::new(read_half),
        writer: FrameWriter::new(write_half),
        received: VecDeque::new(),
    }
}

async fn wait_registered(registry: &ConnectionRegistry, meter_id: &str) {
    for _ in 0..100 {
        if registry.lookup(meter_id).await.is_some() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{} never registered", meter_id);
}

#[tokio::test]
async fn test_meter_logs_on_and_is_registered() {
    let (listener, _telemetry) = gateway();
    let registry = listener.registry();
    let mut meter = dial_in(&listener, "10.1.0.1:40000");

    meter.log_on("MTR0001").await;
    wait_registered(&registry, "meter-1").await;
    assert_eq!(registry.list().await, vec!["meter-1".to_string()]);
}

#[tokio::test]
async fn test_command_routed_and_reading_forwarded() {
    let (listener, mut telemetry) = gateway();
    let registry = listener.registry();
    let mut first = dial_in(&listener, "10.1.0.1:40000");
    let mut second = dial_in(&listener, "10.1.0.2:40000");
    first.log_on("MTR0001").await;
    second.log_on("MTR0002").await;
    wait_registered(&registry, "meter-2").await;

    let voltage = ObisCode::new(1, 0, 32, 7, 0, 255);
    registry
        .send_command("meter-2", MeterCommand::read(voltage, 3, 2))
        .await
        .unwrap();

    let get = match second.next_apdu().await {
        Apdu::GetRequest(get) => get,
        other => panic!("expected GET-request, got {:?}", other),
    };
    assert_eq!(get.descriptor.obis, voltage);

    let reading = DataObject::Reading(Reading::new(DataObject::Unsigned16(2300), ScalerUnit::new(-1, 35)));
    let response = Apdu::GetResponse(GetResponse::data(get.invoke_id, reading));
    second.send(HdlcFrame::information(METER, response.encode())).await;

    let received = tokio::time::timeout(Duration::from_secs(5), telemetry.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received.meter_id, "meter-2");
    assert_eq!(received.obis, Some(voltage));
    assert_eq!(received.value.as_f64(), Some(230.0));
}

#[tokio::test]
async fn test_command_to_unknown_meter_fails() {
    let (listener, _telemetry) = gateway();
    let err = listener
        .registry()
        .send_command("meter-9", MeterCommand::ReadClock)
        .await
        .unwrap_err();
    assert!(matches!(err, DlmsError::InvalidState(_)));
}

#[tokio::test]
async fn test_release_keeps_connection() {
    let (listener, _telemetry) = gateway();
    let registry = listener.registry();
    let mut meter = dial_in(&listener, "10.1.0.1:40000");
    meter.log_on("MTR0001").await;
    wait_registered(&registry, "meter-1").await;

    meter.send(HdlcFrame::information(METER, Apdu::ReleaseRequest.encode())).await;
    assert_eq!(meter.next_apdu().await, Apdu::ReleaseResponse);

    meter.log_on("MTR0001").await;
    assert!(registry.lookup("meter-1").await.is_some());

    meter.send(HdlcFrame::disc(METER)).await;
    let ua = meter.next_frame().await;
    assert_eq!(ua.frame_type(), FrameType::UnnumberedAcknowledge);
}

#[tokio::test]
async fn test_hangup_unregisters_meter() {
    let (listener, _telemetry) = gateway();
    let registry = listener.registry();
    let mut meter = dial_in(&listener, "10.1.0.1:40000");
    meter.log_on("MTR0001").await;
    wait_registered(&registry, "meter-1").await;

    drop(meter);
    for _ in 0..100 {
        if registry.is_empty().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("meter-1 still registered after hangup");
}
