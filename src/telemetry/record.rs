//! The metric record and its wire layout.
//!
//! A record is written as
//!
//! ```text
//! [version:1][timestamp:8][brokerId:4]
//! [brokerRackLen:4][brokerRack bytes]
//! -- topic-partition records only --
//! [topicLen:4][topic bytes][partition:4]
//! -- common suffix --
//! [key:1][value:8] ... repeated until the end of the buffer
//! ```
//!
//! with all integers big-endian. The record kind itself is not part of the
//! layout: it travels in an outer record-type/length header owned by the
//! transport layer, which is why [`MetricRecord::decode`] takes the type tag
//! as an argument and [`MetricRecord::encode`] reserves `header_pos` bytes at
//! the front of the buffer for the caller to fill in.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::io::{Cursor, Read};

use super::traits::{ReadError, ReadType, WriteError, WriteType};

/// Current version of the wire format.
///
/// Decoding fails with [`ReadError::UnknownVersion`] for anything newer.
pub const METRIC_VERSION: u8 = 0;

/// Type tag of a record scoped to a single topic partition.
pub const TOPIC_PARTITION_METRIC: u8 = 0;

/// Type tag of a broker-level record.
pub const BROKER_METRIC: u8 = 1;

/// What entity a [`MetricRecord`] describes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetricKind {
    /// Broker-level sample.
    Broker,

    /// Sample scoped to a single partition hosted on the reporting broker.
    TopicPartition { topic: String, partition: i32 },
}

/// A single load-metric sample reported by a broker to the balancer.
///
/// Records are built from live measurements on the emitting broker once per
/// reporting interval, serialized with [`MetricRecord::encode`], decoded on
/// the balancer with [`MetricRecord::decode`] and discarded after
/// aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricRecord {
    /// Epoch millis at which the sample was taken.
    pub time: i64,

    /// The reporting broker.
    pub broker_id: i32,

    /// Rack of the reporting broker; empty when rack metadata is not
    /// configured.
    pub broker_rack: String,

    /// The entity the sample describes.
    pub kind: MetricKind,

    /// Metric values keyed by raw metric tag, see
    /// [`metric_key`](super::metric_key).
    pub metrics: BTreeMap<u8, f64>,
}

impl MetricRecord {
    /// A broker-level record with no metric values yet.
    pub fn broker(time: i64, broker_id: i32, broker_rack: impl Into<String>) -> Self {
        Self {
            time,
            broker_id,
            broker_rack: broker_rack.into(),
            kind: MetricKind::Broker,
            metrics: BTreeMap::new(),
        }
    }

    /// A topic-partition record with no metric values yet.
    pub fn topic_partition(
        time: i64,
        broker_id: i32,
        broker_rack: impl Into<String>,
        topic: impl Into<String>,
        partition: i32,
    ) -> Self {
        Self {
            time,
            broker_id,
            broker_rack: broker_rack.into(),
            kind: MetricKind::TopicPartition {
                topic: topic.into(),
                partition,
            },
            metrics: BTreeMap::new(),
        }
    }

    /// Adds one metric value, replacing any previous value for the same key.
    pub fn put(mut self, key: u8, value: f64) -> Self {
        self.metrics.insert(key, value);
        self
    }

    /// The type tag carried in the outer framing header for this record.
    pub fn metric_type(&self) -> u8 {
        match self.kind {
            MetricKind::Broker => BROKER_METRIC,
            MetricKind::TopicPartition { .. } => TOPIC_PARTITION_METRIC,
        }
    }

    /// Stable identity of the measured entity, used for upsert/dedup in the
    /// balancer's aggregation window.
    pub fn key(&self) -> String {
        match &self.kind {
            MetricKind::Broker => format!("broker#{}", self.broker_id),
            MetricKind::TopicPartition { topic, partition } => format!("{topic}#{partition}"),
        }
    }

    /// Serializes the record into a freshly allocated buffer of exactly
    /// `header_pos` + record-size bytes.
    ///
    /// The record starts at `header_pos`; the bytes before it are zeroed and
    /// left for the caller's outer record-type/length header, which is shared
    /// across record kinds and not owned here.
    pub fn encode(&self, header_pos: usize) -> Result<Vec<u8>, WriteError> {
        let mut size = 1 + 8 + 4 + 4 + self.broker_rack.len();
        if let MetricKind::TopicPartition { topic, .. } = &self.kind {
            size += 4 + topic.len() + 4;
        }
        size += self.metrics.len() * (1 + 8);

        let mut buf = Vec::with_capacity(header_pos + size);
        buf.resize(header_pos, 0);

        METRIC_VERSION.write(&mut buf)?;
        self.time.write(&mut buf)?;
        self.broker_id.write(&mut buf)?;
        self.broker_rack.write(&mut buf)?;

        if let MetricKind::TopicPartition { topic, partition } = &self.kind {
            topic.write(&mut buf)?;
            partition.write(&mut buf)?;
        }

        for (key, value) in &self.metrics {
            key.write(&mut buf)?;
            value.write(&mut buf)?;
        }

        Ok(buf)
    }

    /// Deserializes a record of the given outer type tag.
    ///
    /// The version byte is validated before any other field is read, so a
    /// record produced by a newer encoder fails fast with
    /// [`ReadError::UnknownVersion`] instead of being misparsed.
    pub fn decode(metric_type: u8, data: &[u8]) -> Result<Self, ReadError> {
        if metric_type != BROKER_METRIC && metric_type != TOPIC_PARTITION_METRIC {
            return Err(ReadError::UnknownMetricType(metric_type));
        }

        let mut reader = Cursor::new(data);

        let version = u8::read(&mut reader)?;
        if version > METRIC_VERSION {
            return Err(ReadError::UnknownVersion { version });
        }

        let time = i64::read(&mut reader)?;
        let broker_id = i32::read(&mut reader)?;
        let broker_rack = String::read(&mut reader)?;

        let kind = match metric_type {
            BROKER_METRIC => MetricKind::Broker,
            _ => {
                let topic = String::read(&mut reader)?;
                let partition = i32::read(&mut reader)?;
                MetricKind::TopicPartition { topic, partition }
            }
        };

        let metrics = read_metrics_body(&mut reader)?;

        Ok(Self {
            time,
            broker_id,
            broker_rack,
            kind,
            metrics,
        })
    }
}

impl Display for MetricRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            MetricKind::Broker => write!(
                f,
                "[BrokerMetrics,time={},broker={},{} values]",
                self.time,
                self.broker_id,
                self.metrics.len(),
            ),
            MetricKind::TopicPartition { topic, partition } => write!(
                f,
                "[TopicPartitionMetrics,time={},broker={},partition={}-{},{} values]",
                self.time,
                self.broker_id,
                topic,
                partition,
                self.metrics.len(),
            ),
        }
    }
}

/// Reads `(key, value)` pairs until the buffer is exhausted.
///
/// The body carries no element count; its extent is delimited by the outer
/// length header, i.e. by the end of `data` passed to decode.
fn read_metrics_body<R: Read>(reader: &mut R) -> Result<BTreeMap<u8, f64>, ReadError> {
    let mut metrics = BTreeMap::new();

    loop {
        let mut key = [0u8; 1];
        if reader.read(&mut key)? == 0 {
            break;
        }
        let value = f64::read(reader)?;
        metrics.insert(key[0], value);
    }

    Ok(metrics)
}
