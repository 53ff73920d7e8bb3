use std::io;

use serde::{Deserialize, Serialize};

use crate::namespace::{exec_in, Namespace};
use crate::runner::{check, Runner};

/// Traffic-control parameters of a link, applied via `tc netem` on both ends.
///
/// All fields are optional: only the ones set are passed to netem, and a
/// link with no field set gets no qdisc at all.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkShaping {
    pub bw_mbit: Option<f64>,
    pub delay_ms: Option<u32>,
    pub jitter_ms: Option<u32>,
    pub loss_percent: Option<f32>,
    /// netem queue `limit` in packets.
    pub max_queue_size: Option<u32>,
}

impl LinkShaping {
    pub fn is_empty(&self) -> bool {
        self.bw_mbit.is_none()
            && self.delay_ms.is_none()
            && self.loss_percent.is_none()
            && self.max_queue_size.is_none()
    }

    pub fn validate(&self) -> Result<(), String> {
        if let Some(bw) = self.bw_mbit {
            if !bw.is_finite() || bw <= 0.0 {
                return Err(format!("bandwidth must be positive, got {bw} Mbit/s"));
            }
        }
        if let Some(loss) = self.loss_percent {
            if !(0.0..=100.0).contains(&loss) {
                return Err(format!("loss must be within 0..=100 %, got {loss}"));
            }
        }
        if self.jitter_ms.is_some() && self.delay_ms.is_none() {
            return Err("jitter requires a delay".into());
        }
        if self.max_queue_size == Some(0) {
            return Err("queue size must be at least one packet".into());
        }
        Ok(())
    }

    /// Arguments after `tc qdisc add dev <iface> root netem`.
    pub fn netem_params(&self) -> Vec<String> {
        let mut args = Vec::new();

        if let Some(limit) = self.max_queue_size {
            args.push("limit".into());
            args.push(limit.to_string());
        }

        if let Some(delay) = self.delay_ms {
            args.push("delay".into());
            args.push(format!("{}ms", delay));

            if let Some(jitter) = self.jitter_ms {
                if jitter > 0 {
                    args.push(format!("{}ms", jitter));
                }
            }
        }

        if let Some(loss) = self.loss_percent {
            args.push("loss".into());
            args.push(format!("{}%", loss));
        }

        if let Some(bw) = self.bw_mbit {
            args.push("rate".into());
            args.push(format!("{}kbit", (bw * 1000.0).round() as u64));
        }

        args
    }
}

/// Installs the netem qdisc for `shaping` on `interface`.
///
/// Any existing root qdisc is removed first (best effort). An empty
/// shaping is a no-op.
pub fn apply_shaping<R: Runner + ?Sized>(
    runner: &R,
    ns: Option<&Namespace>,
    interface: &str,
    shaping: &LinkShaping,
) -> io::Result<()> {
    if shaping.is_empty() {
        return Ok(());
    }

    let _ = exec_in(runner, ns, "tc", &["qdisc", "del", "dev", interface, "root"]);

    let mut args_storage: Vec<String> = vec![
        "qdisc".into(),
        "add".into(),
        "dev".into(),
        interface.into(),
        "root".into(),
        "netem".into(),
    ];
    args_storage.extend(shaping.netem_params());

    let args: Vec<&str> = args_storage.iter().map(|s| s.as_str()).collect();
    let output = exec_in(runner, ns, "tc", &args)?;
    check(output, &format!("apply tc netem on {interface} (tc {})", args.join(" ")))?;

    tracing::debug!(interface, params = %shaping.netem_params().join(" "), "link shaped");
    Ok(())
}
