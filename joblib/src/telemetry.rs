use serde::Serialize;
use std::process::Stdio;
use tokio::process::Command;

const QUERY_ARGS: &[&str] = &[
    "--query-gpu=index,name,utilization.gpu,memory.used,memory.total,temperature.gpu",
    "--format=csv,noheader,nounits",
];

/// Usage figures for one GPU.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GpuStats {
    pub id: u32,
    pub name: String,
    /// Percent, one decimal.
    pub load: Option<f64>,
    /// Percent of total memory in use, one decimal.
    #[serde(rename = "memUtil")]
    pub mem_util: Option<f64>,
    pub temperature: Option<i64>,
}

pub type TelemetrySnapshot = Vec<GpuStats>;

/// Samples GPU usage by shelling out to `nvidia-smi`.
#[derive(Clone, Debug)]
pub struct TelemetrySampler {
    program: String,
}

impl Default for TelemetrySampler {
    fn default() -> Self {
        Self::new("nvidia-smi")
    }
}

impl TelemetrySampler {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Take a fresh snapshot. Never fails: a missing or broken backend yields no devices.
    pub async fn sample(&self) -> TelemetrySnapshot {
        let output = Command::new(&self.program)
            .args(QUERY_ARGS)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await;
        match output {
            Ok(output) if output.status.success() => {
                parse_snapshot(&String::from_utf8_lossy(&output.stdout))
            }
            Ok(output) => {
                tracing::debug!(status = ?output.status, "gpu query exited unsuccessfully");
                Vec::new()
            }
            Err(err) => {
                tracing::debug!(program = %self.program, error = %err, "gpu query unavailable");
                Vec::new()
            }
        }
    }
}

/// Parse `nvidia-smi` csv rows into a snapshot ordered by device id.
pub fn parse_snapshot(csv: &str) -> TelemetrySnapshot {
    let mut snapshot: TelemetrySnapshot = csv.lines().filter_map(parse_row).collect();
    snapshot.sort_by_key(|gpu| gpu.id);
    snapshot
}

fn parse_row(row: &str) -> Option<GpuStats> {
    let row = row.trim();
    if row.is_empty() {
        return None;
    }
    // the name may itself contain commas, so peel fixed fields off both ends
    let (index, rest) = row.split_once(',')?;
    let mut tail = rest.rsplitn(5, ',');
    let temperature = tail.next()?;
    let mem_total = tail.next()?;
    let mem_used = tail.next()?;
    let utilization = tail.next()?;
    let name = tail.next()?;

    let mem_util = match (number(mem_used), number(mem_total)) {
        (Some(used), Some(total)) if total > 0.0 => Some(round1(used / total * 100.0)),
        _ => None,
    };
    Some(GpuStats {
        id: index.trim().parse().ok()?,
        name: name.trim().to_string(),
        load: number(utilization).map(round1),
        mem_util,
        temperature: number(temperature).map(|t| t.round() as i64),
    })
}

fn number(field: &str) -> Option<f64> {
    field.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
