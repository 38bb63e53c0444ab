//! Apply, status, and clear with the real tools inside a network namespace.
//!
//! These tests require root privileges. They skip themselves when the kernel
//! lacks the `dummy`, `ifb`, tbf, or matchall modules.

use tcshape::exec::Outcome;
use tcshape::rate::RateUnit;
use tcshape::shaper::{Limits, Report};
use tcshape::{Shaper, ShaperConfig, SystemRunner};

use crate::common::{TestNamespace, is_unsupported};

const DEV: &str = "tcs0";
const IFB: &str = "ifbt0";

fn namespace_shaper(ns: &TestNamespace) -> Shaper<SystemRunner> {
    let config = ShaperConfig {
        ifb_device: IFB.into(),
        ..Default::default()
    };
    Shaper::with_config(ns.runner(), config)
}

/// Returns true if a step failed because a kernel module is missing.
fn unsupported(report: &Report) -> bool {
    report.failures().any(|step| match &step.outcome {
        Outcome::Failed(e) => e.stderr().is_some_and(is_unsupported),
        _ => false,
    })
}

macro_rules! require_supported {
    ($report:expr) => {
        if unsupported(&$report) {
            eprintln!("Skipping test: kernel lacks a tc module: {:?}", $report);
            return Ok(());
        }
    };
}

#[tokio::test]
async fn test_apply_status_clear() -> tcshape::Result<()> {
    require_root!();

    let ns = TestNamespace::new("live")?;
    require_module!(ns.add_dummy(DEV));
    require_module!(ns.add_ifb(IFB));
    let shaper = namespace_shaper(&ns);

    let report = shaper
        .apply_rate(DEV, "1024", RateUnit::KibibytesPerSec)
        .await?;
    require_supported!(report);
    assert!(report.is_clean(), "{:?}", report);

    let qdiscs = ns.exec("tc", &["qdisc", "show", "dev", DEV])?;
    assert!(qdiscs.contains("tbf"), "{}", qdiscs);
    assert!(qdiscs.contains("ingress"), "{}", qdiscs);

    let status = shaper
        .status_reader()
        .query(DEV, RateUnit::KibibytesPerSec)
        .await?;
    assert_eq!(status.upload, Some(8192));
    assert_eq!(status.download, Some(8192));

    let report = shaper.clear(DEV).await?;
    assert!(report.is_clean(), "{:?}", report);

    let status = shaper
        .status_reader()
        .query(DEV, RateUnit::KibibytesPerSec)
        .await?;
    assert_eq!(status.to_string(), "No Limit Applied");

    Ok(())
}

#[tokio::test]
async fn test_reapply_without_clear() -> tcshape::Result<()> {
    require_root!();

    let ns = TestNamespace::new("reapply")?;
    require_module!(ns.add_dummy(DEV));
    require_module!(ns.add_ifb(IFB));
    let shaper = namespace_shaper(&ns);

    let report = shaper.apply(DEV, 8192).await?;
    require_supported!(report);

    let report = shaper.apply(DEV, 4096).await?;
    assert!(report.is_clean(), "{:?}", report);

    let status = shaper
        .status_reader()
        .query(DEV, RateUnit::KibibytesPerSec)
        .await?;
    assert_eq!(status.upload, Some(4096));
    assert_eq!(status.download, Some(4096));

    Ok(())
}

#[tokio::test]
async fn test_upload_only() -> tcshape::Result<()> {
    require_root!();

    let ns = TestNamespace::new("upload")?;
    require_module!(ns.add_dummy(DEV));
    require_module!(ns.add_ifb(IFB));
    let shaper = namespace_shaper(&ns);

    let report = shaper.apply_limits(DEV, Limits::upload(2048)).await?;
    require_supported!(report);

    let status = shaper
        .status_reader()
        .query(DEV, RateUnit::KibibytesPerSec)
        .await?;
    assert_eq!(status.upload, Some(2048));
    assert_eq!(status.download, None);

    Ok(())
}

#[tokio::test]
async fn test_clear_untouched_interface() -> tcshape::Result<()> {
    require_root!();

    let ns = TestNamespace::new("clear")?;
    require_module!(ns.add_dummy(DEV));
    let shaper = namespace_shaper(&ns);

    // Nothing was applied: the interface-side deletes fail, the IFB one
    // fails on the missing device. Clear still completes every step.
    let report = shaper.clear(DEV).await?;
    assert_eq!(report.steps().len(), 3);
    assert!(!report.aborted());

    Ok(())
}
