//! End-to-end driver scenarios over a scripted mock link
//!
//! Time is paused in every test: periodic tasks and per-job timeouts run on
//! the simulated clock, so brownout and watchdog flows that span minutes of
//! modem time finish instantly and deterministically.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use simgate_core::{
    DeliveryPdu, MockCodec, MockHandle, MockLink, Modem, ModemConfig, ModemError, ModemEvent,
    PartStatus, PduPart, RegistrationStatus, SmsOptions, SmsStatus, TpduType,
};

const ESC: u8 = 0x1B;

fn part(tpdu_length: usize, smsc_tpdu: &str) -> PduPart {
    PduPart {
        tpdu_length,
        smsc_tpdu: smsc_tpdu.to_owned(),
    }
}

fn modem_with(config: ModemConfig, codec: MockCodec) -> (Modem, MockHandle) {
    let (link, handle) = MockLink::pair();
    let modem = Modem::new(link, config, Arc::new(codec));
    (modem, handle)
}

async fn expect_and_reply(handle: &mut MockHandle, expect: &[u8], reply: &[u8]) {
    let written = handle.written().await;
    assert_eq!(
        written,
        expect.to_vec(),
        "unexpected command: {:?}",
        String::from_utf8_lossy(&written)
    );
    handle.feed(reply);
}

/// Play the modem's side of a successful cold boot without a PIN.
async fn drive_cold_boot(handle: &mut MockHandle) {
    expect_and_reply(handle, b"AT\r", b"\r\nOK\r\n").await;
    expect_and_reply(handle, b"AT+CMEE=2\r", b"\r\nOK\r\n").await;
    expect_and_reply(handle, b"AT+CPIN?\r", b"\r\n+CPIN: READY\r\n\r\nOK\r\n").await;
    expect_and_reply(handle, b"AT+CNMI=2,1,2,1,0\r", b"\r\nOK\r\n").await;
    expect_and_reply(handle, b"AT+CMGF=0\r", b"\r\nOK\r\n").await;
    expect_and_reply(handle, b"AT+CREG?\r", b"\r\n+CREG: 0,1\r\n\r\nOK\r\n").await;
}

async fn wait_for(
    events: &mut broadcast::Receiver<ModemEvent>,
    pred: impl Fn(&ModemEvent) -> bool,
) -> ModemEvent {
    loop {
        let event = events.recv().await.expect("event stream closed");
        if pred(&event) {
            return event;
        }
    }
}

#[tokio::test(start_paused = true)]
async fn cold_boot_without_pin_reaches_ready_state() {
    let (modem, mut handle) = modem_with(ModemConfig::default(), MockCodec::new(vec![part(23, "00")]));
    let mut events = modem.subscribe();

    drive_cold_boot(&mut handle).await;

    assert_eq!(events.recv().await.unwrap(), ModemEvent::Opened);
    assert_eq!(events.recv().await.unwrap(), ModemEvent::ModemReady(true));
    assert_eq!(events.recv().await.unwrap(), ModemEvent::Initialized);
    let network = events.recv().await.unwrap();
    match network {
        ModemEvent::Network(reading) => {
            assert_eq!(reading.action, 0);
            assert_eq!(reading.status, RegistrationStatus::Registered);
        }
        other => panic!("expected Network, got {other:?}"),
    }
    assert!(matches!(
        events.recv().await.unwrap(),
        ModemEvent::NetworkStatus(_)
    ));

    let status = modem.status();
    assert!(status.initialized);
    assert!(status.network_ready);
    assert_eq!(status.retry_number, 0);
    assert_eq!(status.reset_number, 0);
}

#[tokio::test(start_paused = true)]
async fn pin_unlock_waits_for_the_ready_confirmation() {
    let (modem, mut handle) = modem_with(
        ModemConfig::default().with_pin("1234"),
        MockCodec::new(vec![part(23, "00")]),
    );
    let mut events = modem.subscribe();

    expect_and_reply(&mut handle, b"AT\r", b"\r\nOK\r\n").await;
    expect_and_reply(&mut handle, b"AT+CMEE=2\r", b"\r\nOK\r\n").await;
    expect_and_reply(&mut handle, b"AT+CPIN?\r", b"\r\n+CPIN: SIM PIN\r\n\r\nOK\r\n").await;

    // the unlock command is acknowledged with OK, but that alone must not
    // complete the job
    assert_eq!(handle.written().await, b"AT+CPIN=1234\r".to_vec());
    handle.feed(b"\r\nOK\r\n");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(handle.try_written().is_none(), "unlock completed on bare OK");

    // the trailing +CPIN: READY line is the terminal condition
    handle.feed(b"\r\n+CPIN: READY\r\n");
    expect_and_reply(&mut handle, b"AT+CNMI=2,1,2,1,0\r", b"\r\nOK\r\n").await;
    expect_and_reply(&mut handle, b"AT+CMGF=0\r", b"\r\nOK\r\n").await;
    expect_and_reply(&mut handle, b"AT+CREG?\r", b"\r\n+CREG: 0,1\r\n\r\nOK\r\n").await;

    wait_for(&mut events, |e| matches!(e, ModemEvent::Initialized)).await;
    assert!(modem.status().sim_unlocked);
}

#[tokio::test(start_paused = true)]
async fn single_part_sms_is_sent_and_delivered() {
    let report = "07916407058099F9060B911651993396F0";
    let codec = MockCodec::new(vec![part(23, "0011000B9121436587F9")]).with_report(
        report,
        DeliveryPdu {
            reference: 42,
            tpdu_type: TpduType::StatusReport,
            status: 0x00,
        },
    );
    let (modem, mut handle) = modem_with(ModemConfig::default(), codec);
    let mut events = modem.subscribe();

    drive_cold_boot(&mut handle).await;
    wait_for(&mut events, |e| matches!(e, ModemEvent::Initialized)).await;

    let mut watcher = modem.subscribe();
    let id = modem
        .send_sms("+49 151.1234-5678", "hello", SmsOptions::default())
        .await
        .unwrap();

    // the spooler picks the message up, one CMGS job per part
    expect_and_reply(&mut handle, b"AT+CMGS=23\r", b"\r\n> ").await;
    // PDU body goes out raw, terminated by Ctrl-Z, no CR appended
    assert_eq!(handle.written().await, b"0011000B9121436587F9\x1a".to_vec());
    handle.feed(b"\r\n+CMGS: 42\r\n\r\nOK\r\n");

    wait_for(&mut events, |e| {
        matches!(e, ModemEvent::SmsStatusChange(c) if c.part_status == PartStatus::Sent)
    })
    .await;
    let snapshot = modem.sms_status(id).await.unwrap();
    assert_eq!(snapshot.status, SmsStatus::Sent);
    assert_eq!(snapshot.parts[0].short_reference, Some(42));

    // the delivery report arrives later, unsolicited
    handle.feed(format!("\r\n+CDS: 24\r\n{report}\r\n").as_bytes());
    wait_for(&mut events, |e| {
        matches!(e, ModemEvent::SmsStatusChange(c) if c.part_status == PartStatus::Delivered)
    })
    .await;

    let snapshot = modem.sms_status(id).await.unwrap();
    assert_eq!(snapshot.status, SmsStatus::Delivered);

    // every part transition produced exactly one status event
    let (mut sending, mut sent, mut delivered) = (0, 0, 0);
    while let Ok(event) = watcher.try_recv() {
        if let ModemEvent::SmsStatusChange(change) = event {
            match change.part_status {
                PartStatus::Sending => sending += 1,
                PartStatus::Sent => sent += 1,
                PartStatus::Delivered => delivered += 1,
                _ => {}
            }
        }
    }
    assert_eq!((sending, sent, delivered), (1, 1, 1));
}

#[tokio::test(start_paused = true)]
async fn multipart_delivery_reports_route_by_reference() {
    let report_last = "00AA";
    let report_first = "00BB";
    let codec = MockCodec::new(vec![part(30, "00AAAA"), part(31, "00BBBB")])
        .with_report(
            report_last,
            DeliveryPdu {
                reference: 43,
                tpdu_type: TpduType::StatusReport,
                status: 0x00,
            },
        )
        .with_report(
            report_first,
            DeliveryPdu {
                reference: 42,
                tpdu_type: TpduType::StatusReport,
                status: 0x00,
            },
        );
    let (modem, mut handle) = modem_with(ModemConfig::default(), codec);
    let mut events = modem.subscribe();

    drive_cold_boot(&mut handle).await;
    wait_for(&mut events, |e| matches!(e, ModemEvent::Initialized)).await;

    let id = modem
        .send_sms("+4915112345678", "long text", SmsOptions::default())
        .await
        .unwrap();

    expect_and_reply(&mut handle, b"AT+CMGS=30\r", b"\r\n> ").await;
    assert_eq!(handle.written().await, b"00AAAA\x1a".to_vec());
    handle.feed(b"\r\n+CMGS: 42\r\n\r\nOK\r\n");

    expect_and_reply(&mut handle, b"AT+CMGS=31\r", b"\r\n> ").await;
    assert_eq!(handle.written().await, b"00BBBB\x1a".to_vec());
    handle.feed(b"\r\n+CMGS: 43\r\n\r\nOK\r\n");

    wait_for(&mut events, |e| {
        matches!(e, ModemEvent::SmsStatusChange(c) if c.sms_status == SmsStatus::Sent)
    })
    .await;

    // the report for the LAST part arrives first; aggregate must not claim
    // delivery while the first part is still outstanding
    handle.feed(format!("\r\n+CDS: 24\r\n{report_last}\r\n").as_bytes());
    wait_for(&mut events, |e| {
        matches!(e, ModemEvent::SmsStatusChange(c) if c.part_status == PartStatus::Delivered)
    })
    .await;
    let snapshot = modem.sms_status(id).await.unwrap();
    assert_eq!(snapshot.status, SmsStatus::Sent);

    handle.feed(format!("\r\n+CDS: 24\r\n{report_first}\r\n").as_bytes());
    wait_for(&mut events, |e| {
        matches!(e, ModemEvent::SmsStatusChange(c) if c.sms_status == SmsStatus::Delivered)
    })
    .await;
    let snapshot = modem.sms_status(id).await.unwrap();
    assert_eq!(snapshot.status, SmsStatus::Delivered);
    assert!(snapshot.parts.iter().all(|p| p.status == PartStatus::Delivered));
}

#[tokio::test(start_paused = true)]
async fn failed_delivery_maps_the_status_byte() {
    let report = "00CC";
    let codec = MockCodec::new(vec![part(23, "00DD")]).with_report(
        report,
        DeliveryPdu {
            reference: 7,
            tpdu_type: TpduType::StatusReport,
            status: 0x41,
        },
    );
    let (modem, mut handle) = modem_with(ModemConfig::default(), codec);
    let mut events = modem.subscribe();

    drive_cold_boot(&mut handle).await;
    wait_for(&mut events, |e| matches!(e, ModemEvent::Initialized)).await;

    modem
        .send_sms("+4915112345678", "hi", SmsOptions::default())
        .await
        .unwrap();
    expect_and_reply(&mut handle, b"AT+CMGS=23\r", b"\r\n> ").await;
    assert_eq!(handle.written().await, b"00DD\x1a".to_vec());
    handle.feed(b"\r\n+CMGS: 7\r\n\r\nOK\r\n");
    wait_for(&mut events, |e| {
        matches!(e, ModemEvent::SmsStatusChange(c) if c.part_status == PartStatus::Sent)
    })
    .await;

    handle.feed(format!("\r\n+CDS: 24\r\n{report}\r\n").as_bytes());
    let error = wait_for(&mut events, |e| matches!(e, ModemEvent::SmsError(_))).await;
    match error {
        ModemEvent::SmsError(e) => {
            assert_eq!(e.error, "incompatible destination");
            assert_eq!(e.error_status, Some(0x41));
        }
        other => panic!("expected SmsError, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn brownout_recovery_resets_and_reinitializes() {
    let (modem, mut handle) = modem_with(ModemConfig::default(), MockCodec::new(vec![part(23, "00")]));
    let mut events = modem.subscribe();

    drive_cold_boot(&mut handle).await;
    wait_for(&mut events, |e| matches!(e, ModemEvent::Initialized)).await;

    // three probes time out back to back
    for _ in 0..3 {
        assert_eq!(handle.written().await, b"AT\r".to_vec());
        wait_for(&mut events, |e| matches!(e, ModemEvent::Brownout)).await;
    }

    // the network monitor slips in a registration check between probes
    expect_and_reply(&mut handle, b"AT+CREG?\r", b"\r\n+CREG: 0,1\r\n\r\nOK\r\n").await;

    // the fourth consecutive failure exceeds the brownout budget
    assert_eq!(handle.written().await, b"AT\r".to_vec());
    wait_for(&mut events, |e| matches!(e, ModemEvent::Brownout)).await;

    // reset: CR+ESC to escape any prompt, then CFUN, then the settle window
    assert_eq!(handle.written().await, vec![b'\r', ESC]);
    assert_eq!(handle.written().await, b"AT+CFUN=1,1\r".to_vec());

    // after the settle the initialization sequence reruns
    drive_cold_boot(&mut handle).await;
    wait_for(&mut events, |e| matches!(e, ModemEvent::Initialized)).await;
    assert!(modem.status().initialized);
}

#[tokio::test(start_paused = true)]
async fn persistent_network_loss_triggers_reset() {
    let (modem, mut handle) = modem_with(ModemConfig::default(), MockCodec::new(vec![part(23, "00")]));
    let mut events = modem.subscribe();

    drive_cold_boot(&mut handle).await;
    wait_for(&mut events, |e| matches!(e, ModemEvent::Initialized)).await;

    // four registration checks in a row come back unregistered; liveness
    // probes keep succeeding in between
    for _ in 0..4 {
        for _ in 0..3 {
            expect_and_reply(&mut handle, b"AT\r", b"\r\nOK\r\n").await;
        }
        expect_and_reply(&mut handle, b"AT+CREG?\r", b"\r\n+CREG: 0,0\r\n\r\nOK\r\n").await;
    }

    assert_eq!(handle.written().await, vec![b'\r', ESC]);
    assert_eq!(handle.written().await, b"AT+CFUN=1,1\r".to_vec());

    drive_cold_boot(&mut handle).await;
    wait_for(&mut events, |e| matches!(e, ModemEvent::Initialized)).await;
    assert!(modem.status().network_ready);
}

#[tokio::test(start_paused = true)]
async fn sms_text_updates_only_while_idle() {
    let (modem, mut handle) = modem_with(ModemConfig::default(), MockCodec::new(vec![part(23, "00EE")]));
    let mut events = modem.subscribe();

    drive_cold_boot(&mut handle).await;
    wait_for(&mut events, |e| matches!(e, ModemEvent::Initialized)).await;

    assert!(matches!(
        modem.update_sms_text(99, "x").await,
        Err(ModemError::UnknownSms(99))
    ));

    let id = modem
        .send_sms("+4915112345678", "first draft", SmsOptions::default())
        .await
        .unwrap();
    // before the spooler picks it up every part is still IDLE
    modem.update_sms_text(id, "final text").await.unwrap();

    expect_and_reply(&mut handle, b"AT+CMGS=23\r", b"\r\n> ").await;
    assert_eq!(handle.written().await, b"00EE\x1a".to_vec());
    handle.feed(b"\r\n+CMGS: 5\r\n\r\nOK\r\n");
    wait_for(&mut events, |e| {
        matches!(e, ModemEvent::SmsStatusChange(c) if c.part_status == PartStatus::Sent)
    })
    .await;

    assert!(modem.update_sms_text(id, "too late").await.is_err());
}

#[tokio::test(start_paused = true)]
async fn cme_errors_surface_with_their_message() {
    let (modem, mut handle) = modem_with(ModemConfig::default(), MockCodec::new(vec![part(23, "00")]));
    let mut events = modem.subscribe();

    drive_cold_boot(&mut handle).await;
    wait_for(&mut events, |e| matches!(e, ModemEvent::Initialized)).await;

    let (result, ()) = tokio::join!(
        modem.exec_raw("AT+BOGUS"),
        expect_and_reply(&mut handle, b"AT+BOGUS\r", b"\r\n+CME ERROR: SIM not inserted\r\n")
    );

    match result {
        Err(ModemError::Command(message)) => assert_eq!(message, "SIM not inserted"),
        other => panic!("expected a command error, got {other:?}"),
    }
}
