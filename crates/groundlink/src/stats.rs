//! Decoding of the radio-statistics JSON stream.
//!
//! The stats daemon writes one JSON object per line. Only the fields the
//! scorer needs are modelled; everything else is ignored. Packet counters
//! arrive as arrays whose first element is the per-interval delta, e.g.
//! `{"all": [120, 98231]}`.

use serde::{Deserialize, Deserializer};

pub const RX_TYPE: &str = "rx";
pub const VIDEO_RX_ID: &str = "video rx";

/// One decoded line of the stats stream.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StatsRecord {
    #[serde(rename = "type", deserialize_with = "null_as_default")]
    pub kind: String,
    #[serde(deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub packets: PacketCounters,
    pub session: Option<SessionInfo>,
    #[serde(deserialize_with = "null_as_default")]
    pub rx_ant_stats: Vec<AntennaStats>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PacketCounters {
    #[serde(deserialize_with = "null_as_default")]
    pub all: Vec<u64>,
    #[serde(deserialize_with = "null_as_default")]
    pub fec_rec: Vec<u64>,
    #[serde(deserialize_with = "null_as_default")]
    pub lost: Vec<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SessionInfo {
    pub fec_k: Option<u32>,
    pub fec_n: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AntennaStats {
    pub rssi_avg: Option<f64>,
    pub snr_avg: Option<f64>,
    pub mcs: Option<i64>,
}

impl StatsRecord {
    pub fn from_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }

    pub fn is_video_rx(&self) -> bool {
        self.kind == RX_TYPE && self.id == VIDEO_RX_ID
    }

    /// Flatten into the values the scorer consumes.
    pub fn to_sample(&self) -> VideoSample {
        let session = self.session.clone().unwrap_or_default();
        VideoSample {
            all_packets: first_or_zero(&self.packets.all),
            fec_rec_packets: first_or_zero(&self.packets.fec_rec),
            lost_packets: first_or_zero(&self.packets.lost),
            fec_k: session.fec_k,
            fec_n: session.fec_n,
            num_antennas: self.rx_ant_stats.len(),
            best_rssi: self
                .rx_ant_stats
                .iter()
                .filter_map(|a| a.rssi_avg)
                .reduce(f64::max),
            best_snr: self
                .rx_ant_stats
                .iter()
                .filter_map(|a| a.snr_avg)
                .reduce(f64::max),
        }
    }
}

/// `null` reads like an absent field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn first_or_zero(counter: &[u64]) -> u64 {
    counter.first().copied().unwrap_or(0)
}

/// Per-sample inputs to the link scorer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoSample {
    pub all_packets: u64,
    pub fec_rec_packets: u64,
    pub lost_packets: u64,
    pub fec_k: Option<u32>,
    pub fec_n: Option<u32>,
    pub num_antennas: usize,
    /// Strongest antenna RSSI (dBm), if any antenna reported one.
    pub best_rssi: Option<f64>,
    /// Best antenna SNR (dB), if any antenna reported one.
    pub best_snr: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_full_video_record() {
        let line = r#"{"type":"rx","id":"video rx","timestamp":1.5,
            "packets":{"all":[100,5000],"fec_rec":[3,40],"lost":[1,2]},
            "session":{"fec_type":"VDM_RS","fec_k":8,"fec_n":12},
            "rx_ant_stats":[
                {"ant":0,"rssi_avg":-62,"snr_avg":18,"mcs":1},
                {"ant":1,"rssi_avg":-55,"snr_avg":15.5,"mcs":1}
            ]}"#;
        let rec = StatsRecord::from_line(&line.replace('\n', " ")).unwrap();
        assert!(rec.is_video_rx());

        let s = rec.to_sample();
        assert_eq!(s.all_packets, 100);
        assert_eq!(s.fec_rec_packets, 3);
        assert_eq!(s.lost_packets, 1);
        assert_eq!(s.fec_k, Some(8));
        assert_eq!(s.fec_n, Some(12));
        assert_eq!(s.num_antennas, 2);
        assert_eq!(s.best_rssi, Some(-55.0));
        assert_eq!(s.best_snr, Some(18.0));
    }

    #[test]
    fn missing_fields_default() {
        let rec = StatsRecord::from_line(r#"{"type":"rx","id":"video rx"}"#).unwrap();
        let s = rec.to_sample();
        assert_eq!(s, VideoSample::default());
    }

    #[test]
    fn null_fields_read_as_absent() {
        let rec = StatsRecord::from_line(
            r#"{"type":"rx","id":"video rx","packets":null,"session":null,"rx_ant_stats":null}"#,
        )
        .unwrap();
        assert!(rec.is_video_rx());
        assert_eq!(rec.to_sample(), VideoSample::default());

        let rec = StatsRecord::from_line(
            r#"{"type":"rx","id":"video rx","packets":{"all":[50],"fec_rec":null,"lost":null},
                "rx_ant_stats":[{"rssi_avg":null,"snr_avg":12}]}"#,
        )
        .unwrap();
        let s = rec.to_sample();
        assert_eq!(s.all_packets, 50);
        assert_eq!(s.fec_rec_packets, 0);
        assert_eq!(s.lost_packets, 0);
        assert_eq!(s.num_antennas, 1);
        assert_eq!(s.best_rssi, None);
        assert_eq!(s.best_snr, Some(12.0));
    }

    #[test]
    fn antenna_without_values_still_counts() {
        let rec = StatsRecord::from_line(
            r#"{"type":"rx","id":"video rx","packets":{"all":[10]},"rx_ant_stats":[{"mcs":2}]}"#,
        )
        .unwrap();
        let s = rec.to_sample();
        assert_eq!(s.num_antennas, 1);
        assert_eq!(s.best_rssi, None);
        assert_eq!(s.best_snr, None);
    }

    #[test]
    fn other_records_are_not_video() {
        let rec = StatsRecord::from_line(r#"{"type":"rx","id":"mavlink rx"}"#).unwrap();
        assert!(!rec.is_video_rx());
        let rec = StatsRecord::from_line(r#"{"type":"settings","id":"video rx"}"#).unwrap();
        assert!(!rec.is_video_rx());
        let rec = StatsRecord::from_line(r#"{"type":"new_session"}"#).unwrap();
        assert!(!rec.is_video_rx());
    }

    #[test]
    fn malformed_line_is_an_error() {
        assert!(StatsRecord::from_line("{\"type\":\"rx\",").is_err());
        assert!(StatsRecord::from_line("not json").is_err());
        assert!(StatsRecord::from_line(r#"{"packets":{"all":["x"]}}"#).is_err());
    }
}
