//! Status queries against scripted `tc` output.

use std::io;

use tcshape::exec::Output;
use tcshape::rate::RateUnit;
use tcshape::status::{NO_LIMIT, StatusReader};
use tcshape::testing::ScriptedRunner;
use tcshape::ShaperConfig;

const ETH0_SHOW: &[&str] = &["tc", "qdisc", "show", "dev", "eth0"];
const IFB0_SHOW: &[&str] = &["tc", "qdisc", "show", "dev", "ifb0"];

fn tbf(rate: &str) -> Output {
    Output::ok(format!(
        "qdisc tbf 8001: root refcnt 2 rate {} burst 4Kb lat 400ms \n",
        rate
    ))
}

#[tokio::test]
async fn test_both_directions() -> tcshape::Result<()> {
    let runner = ScriptedRunner::new();
    runner
        .respond(ETH0_SHOW, tbf("81920Kbit"))
        .respond(IFB0_SHOW, tbf("81920Kbit"));

    let status = StatusReader::new(&runner)
        .query("eth0", RateUnit::MebibytesPerSec)
        .await?;
    assert_eq!(status.upload, Some(81920));
    assert_eq!(status.download, Some(81920));
    assert_eq!(
        status.to_string(),
        "Upload: 81920 kbit (10.00 MiB/s) | Download: 81920 kbit (10.00 MiB/s)"
    );

    assert_eq!(
        runner.call_strings(),
        vec!["tc qdisc show dev eth0", "tc qdisc show dev ifb0"]
    );
    Ok(())
}

#[tokio::test]
async fn test_upload_only() -> tcshape::Result<()> {
    let runner = ScriptedRunner::new();
    runner
        .respond(ETH0_SHOW, tbf("4096Kbit"))
        .respond(IFB0_SHOW, Output::ok("qdisc noqueue 0: root refcnt 2 \n"));

    let status = StatusReader::new(&runner)
        .query("eth0", RateUnit::KibibytesPerSec)
        .await?;
    assert_eq!(
        status.to_string(),
        "Upload: 4096 kbit (512.00 KiB/s) | Download: Not Applied"
    );
    Ok(())
}

#[tokio::test]
async fn test_download_only() -> tcshape::Result<()> {
    let runner = ScriptedRunner::new();
    runner
        .respond(ETH0_SHOW, Output::ok("qdisc fq_codel 0: root refcnt 2 limit 10240p \n"))
        .respond(IFB0_SHOW, tbf("8Mbit"));

    let status = StatusReader::new(&runner)
        .query("eth0", RateUnit::BytesPerSec)
        .await?;
    assert_eq!(status.upload, None);
    assert_eq!(status.download, Some(8000));
    assert_eq!(
        status.to_string(),
        "Upload: Not Applied | Download: 8000 kbit (1000000.00 B/s)"
    );
    Ok(())
}

#[tokio::test]
async fn test_no_limits() -> tcshape::Result<()> {
    let runner = ScriptedRunner::new();
    runner.respond(&["tc"], Output::ok("qdisc noqueue 0: root refcnt 2 \n"));

    let status = StatusReader::new(&runner)
        .query("eth0", RateUnit::MebibytesPerSec)
        .await?;
    assert!(!status.is_limited());
    assert_eq!(status.to_string(), NO_LIMIT);
    Ok(())
}

#[tokio::test]
async fn test_missing_ifb_is_no_download_limit() -> tcshape::Result<()> {
    let runner = ScriptedRunner::new();
    runner
        .respond(ETH0_SHOW, tbf("100Kbit"))
        .respond(IFB0_SHOW, Output::failed(1, "Cannot find device \"ifb0\"\n"));

    let status = StatusReader::new(&runner)
        .query("eth0", RateUnit::KibibytesPerSec)
        .await?;
    assert_eq!(status.upload, Some(100));
    assert_eq!(status.download, None);
    Ok(())
}

#[tokio::test]
async fn test_unreadable_rate_is_no_limit() -> tcshape::Result<()> {
    let runner = ScriptedRunner::new();
    runner
        .respond(ETH0_SHOW, tbf("lots"))
        .respond(IFB0_SHOW, Output::ok("garbage\n\n"));

    let status = StatusReader::new(&runner)
        .query("eth0", RateUnit::MebibytesPerSec)
        .await?;
    assert_eq!(status.to_string(), NO_LIMIT);
    Ok(())
}

#[tokio::test]
async fn test_tool_unavailable_is_no_limit() -> tcshape::Result<()> {
    let runner = ScriptedRunner::new();
    runner.fail_spawn(&["tc"], io::ErrorKind::NotFound);

    let status = StatusReader::new(&runner)
        .query("eth0", RateUnit::MebibytesPerSec)
        .await?;
    assert_eq!(status.to_string(), NO_LIMIT);
    assert_eq!(runner.calls().len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_invalid_interface() {
    let runner = ScriptedRunner::new();
    let err = StatusReader::new(&runner)
        .query("eth0/../x", RateUnit::MebibytesPerSec)
        .await
        .unwrap_err();
    assert!(err.is_invalid_input());
    assert!(runner.calls().is_empty());
}

#[tokio::test]
async fn test_configured_ifb() -> tcshape::Result<()> {
    let runner = ScriptedRunner::new();
    runner.respond(&["tc", "qdisc", "show", "dev", "ifb5"], tbf("64Kbit"));

    let config = ShaperConfig {
        ifb_device: "ifb5".into(),
        ..Default::default()
    };
    let status = StatusReader::with_config(&runner, &config)
        .query("wlan0", RateUnit::KibibytesPerSec)
        .await?;
    assert_eq!(status.download, Some(64));
    assert_eq!(status.upload, None);
    Ok(())
}

#[test]
fn test_status_json() {
    let status = tcshape::LimiterStatus {
        upload: Some(8192),
        download: None,
        unit: RateUnit::KibibytesPerSec,
    };
    let value = serde_json::to_value(status).unwrap();
    assert_eq!(value["upload_kbit"], 8192);
    assert!(value["download_kbit"].is_null());
}
