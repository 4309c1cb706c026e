//! Kafka connector.
//!
//! `address` is the topic. Each "file" is one record, addressed as `topic:partition:offset`.
//! The connector never commits offsets: listing and reading are observation only.
//!
//! [`KafkaReference`] parsing is always compiled; the client itself needs the `kafka` feature.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::error::{IngestionError, IngestionResult};

#[cfg(feature = "kafka")]
pub use client::{KafkaConfig, KafkaConnector};

/// Location of one Kafka record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KafkaReference {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

impl KafkaReference {
    /// Parse `topic:partition:offset`. Exactly three parts are required.
    pub fn parse(reference: &str) -> IngestionResult<Self> {
        let invalid = |why: &str| {
            IngestionError::invalid_argument(format!(
                "invalid kafka reference '{reference}': {why} (expected topic:partition:offset)"
            ))
        };

        let parts: Vec<&str> = reference.split(':').collect();
        let [topic, partition, offset] = parts.as_slice() else {
            return Err(invalid("wrong number of parts"));
        };
        if topic.is_empty() {
            return Err(invalid("empty topic"));
        }
        let partition = partition
            .trim()
            .parse::<i32>()
            .ok()
            .filter(|p| *p >= 0)
            .ok_or_else(|| invalid("partition is not a non-negative integer"))?;
        let offset = offset
            .trim()
            .parse::<i64>()
            .ok()
            .filter(|o| *o >= 0)
            .ok_or_else(|| invalid("offset is not a non-negative integer"))?;

        Ok(Self {
            topic: topic.to_string(),
            partition,
            offset,
        })
    }
}

impl fmt::Display for KafkaReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.topic, self.partition, self.offset)
    }
}

impl FromStr for KafkaReference {
    type Err = IngestionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Collect up to `max` record references from `records`.
///
/// Stops at the maximum, when nothing arrives within `idle`, when the stream ends, or on
/// cancellation, and returns what was gathered so far. The first error fails the listing.
#[cfg_attr(not(feature = "kafka"), allow(dead_code))]
pub(crate) async fn drain_references<S, E>(
    records: S,
    max: usize,
    idle: Duration,
    cancel: &CancellationToken,
) -> Result<Vec<String>, E>
where
    S: Stream<Item = Result<KafkaReference, E>>,
{
    let mut records = std::pin::pin!(records);
    let mut references = Vec::new();
    while references.len() < max {
        let polled = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            polled = tokio::time::timeout(idle, records.next()) => polled,
        };
        match polled {
            Err(_) | Ok(None) => break,
            Ok(Some(Err(e))) => return Err(e),
            Ok(Some(Ok(reference))) => references.push(reference.to_string()),
        }
    }
    Ok(references)
}

#[cfg(feature = "kafka")]
mod client {
    use std::time::{Duration, Instant};

    use chrono::Utc;
    use rdkafka::config::ClientConfig;
    use rdkafka::consumer::{BaseConsumer, Consumer, StreamConsumer};
    use rdkafka::error::{KafkaError, RDKafkaErrorCode};
    use rdkafka::message::Message;
    use rdkafka::{Offset, TopicPartitionList};
    use tokio_util::sync::CancellationToken;
    use tracing::{debug, info};

    use futures::StreamExt;

    use super::{KafkaReference, drain_references};
    use crate::connectors::run_blocking;
    use crate::error::{IngestionError, IngestionResult};
    use crate::types::{FileMetadata, SourceDescriptor};

    pub const DEFAULT_BOOTSTRAP_SERVERS: &str = "localhost:9092";
    pub const DEFAULT_CONSUMER_GROUP: &str = "file-discovery-service";
    pub const DEFAULT_MAX_MESSAGES_TO_LIST: usize = 100;
    pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);
    /// Upper bound for a single poll while listing, and for metadata requests.
    const POLL_CEILING: Duration = Duration::from_secs(5);

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct KafkaConfig {
        pub topic: String,
        pub bootstrap_servers: String,
        pub consumer_group: String,
        pub max_messages_to_list: usize,
        pub read_timeout: Duration,
    }

    impl KafkaConfig {
        /// Options: `KafkaBootstrapServers` ("localhost:9092"), `KafkaConsumerGroup`
        /// ("file-discovery-service"), `KafkaMaxMessagesToList` (100),
        /// `KafkaReadTimeoutSeconds` (10).
        pub fn from_source(source: &SourceDescriptor) -> IngestionResult<Self> {
            let topic = source.address().trim().to_string();
            if topic.is_empty() {
                return Err(IngestionError::invalid_argument("kafka source address (the topic) is empty"));
            }
            Ok(Self {
                topic,
                bootstrap_servers: source
                    .option_string("KafkaBootstrapServers")?
                    .unwrap_or_else(|| DEFAULT_BOOTSTRAP_SERVERS.to_string()),
                consumer_group: source
                    .option_string("KafkaConsumerGroup")?
                    .unwrap_or_else(|| DEFAULT_CONSUMER_GROUP.to_string()),
                max_messages_to_list: source
                    .option_u64("KafkaMaxMessagesToList")?
                    .map(|n| n as usize)
                    .unwrap_or(DEFAULT_MAX_MESSAGES_TO_LIST),
                read_timeout: source
                    .option_u64("KafkaReadTimeoutSeconds")?
                    .filter(|s| *s > 0)
                    .map(Duration::from_secs)
                    .unwrap_or(DEFAULT_READ_TIMEOUT),
            })
        }

        fn client_config(&self) -> ClientConfig {
            let mut config = ClientConfig::new();
            config
                .set("bootstrap.servers", &self.bootstrap_servers)
                .set("group.id", &self.consumer_group)
                .set("enable.auto.commit", "false")
                .set("enable.auto.offset.store", "false")
                .set("auto.offset.reset", "latest")
                .set("enable.partition.eof", "false");
            config
        }

        fn stream_consumer(&self) -> IngestionResult<StreamConsumer> {
            self.client_config()
                .create()
                .map_err(|e| IngestionError::connection(&self.bootstrap_servers, format!("failed to create consumer: {e}")))
        }

        fn base_consumer(&self) -> IngestionResult<BaseConsumer> {
            self.client_config()
                .create()
                .map_err(|e| IngestionError::connection(&self.bootstrap_servers, format!("failed to create consumer: {e}")))
        }
    }

    #[derive(Debug, Clone, Copy, Default)]
    pub struct KafkaConnector;

    impl KafkaConnector {
        pub async fn read(
            &self,
            source: &SourceDescriptor,
            reference: &str,
            cancel: &CancellationToken,
        ) -> IngestionResult<Vec<u8>> {
            let config = KafkaConfig::from_source(source)?;
            let target = KafkaReference::parse(reference)?;
            if target.topic != config.topic {
                debug!(reference, topic = %config.topic, "reference topic differs from source topic");
            }

            let consumer = config.stream_consumer()?;
            let mut assignment = TopicPartitionList::new();
            assignment
                .add_partition_offset(&target.topic, target.partition, Offset::Offset(target.offset))
                .map_err(|e| map_kafka_error(e, &config, reference))?;
            consumer
                .assign(&assignment)
                .map_err(|e| map_kafka_error(e, &config, reference))?;

            let started = Instant::now();
            let message = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(IngestionError::cancelled(format!("kafka read {reference}"))),
                polled = tokio::time::timeout(config.read_timeout, consumer.recv()) => match polled {
                    Err(_) => {
                        return Err(IngestionError::Timeout {
                            operation: format!("kafka read {reference}"),
                            elapsed: started.elapsed(),
                        });
                    }
                    Ok(Err(e)) => return Err(map_kafka_error(e, &config, reference)),
                    Ok(Ok(m)) => m,
                },
            };

            if message.partition() != target.partition || message.offset() != target.offset {
                debug!(
                    reference,
                    got_partition = message.partition(),
                    got_offset = message.offset(),
                    "broker returned a different record"
                );
                return Err(IngestionError::not_found(reference));
            }
            let data = message.payload().map(<[u8]>::to_vec).unwrap_or_default();
            info!(reference, bytes = data.len(), "read kafka record");
            Ok(data)
        }

        /// Observe up to `KafkaMaxMessagesToList` new records without committing.
        ///
        /// A topic has no directory structure, so `pattern` is not applied: every observed record
        /// is listed. Stops at the first empty poll, at the maximum, or on cancellation, and
        /// returns the references gathered until then. A poll error fails the whole listing.
        pub async fn list(
            &self,
            source: &SourceDescriptor,
            _pattern: &str,
            cancel: &CancellationToken,
        ) -> IngestionResult<Vec<String>> {
            let config = KafkaConfig::from_source(source)?;
            let consumer = config.stream_consumer()?;
            consumer
                .subscribe(&[config.topic.as_str()])
                .map_err(|e| map_kafka_error(e, &config, &config.topic))?;

            let records = consumer.stream().map(|polled| {
                polled.map(|m| KafkaReference {
                    topic: m.topic().to_string(),
                    partition: m.partition(),
                    offset: m.offset(),
                })
            });
            let drained = drain_references(records, config.max_messages_to_list, POLL_CEILING, cancel).await;
            consumer.unsubscribe();

            let references = drained.map_err(|e| map_kafka_error(e, &config, &config.topic))?;
            if cancel.is_cancelled() {
                info!(topic = %config.topic, count = references.len(), "kafka listing cancelled early");
            } else {
                info!(topic = %config.topic, count = references.len(), "listed kafka records");
            }
            Ok(references)
        }

        pub(crate) async fn probe(&self, source: &SourceDescriptor, cancel: &CancellationToken) -> IngestionResult<()> {
            let config = KafkaConfig::from_source(source)?;
            run_blocking("kafka test", cancel, move || {
                let consumer = config.base_consumer()?;
                let metadata = consumer
                    .fetch_metadata(None, POLL_CEILING)
                    .map_err(|e| map_kafka_error(e, &config, &config.bootstrap_servers))?;
                debug!(brokers = metadata.brokers().len(), "kafka metadata fetched");
                Ok(())
            })
            .await
        }

        /// Validates the reference and checks its offset against the partition watermarks.
        pub async fn describe(
            &self,
            source: &SourceDescriptor,
            reference: &str,
            cancel: &CancellationToken,
        ) -> IngestionResult<FileMetadata> {
            let config = KafkaConfig::from_source(source)?;
            let target = KafkaReference::parse(reference)?;
            let reference = reference.to_string();
            run_blocking("kafka describe", cancel, move || {
                let consumer = config.base_consumer()?;
                let (low, high) = consumer
                    .fetch_watermarks(&target.topic, target.partition, POLL_CEILING)
                    .map_err(|e| map_kafka_error(e, &config, &reference))?;
                if target.offset < low || target.offset >= high {
                    return Err(IngestionError::not_found(format!(
                        "{reference} (partition holds offsets {low}..{high})"
                    )));
                }
                Ok(record_metadata(&target))
            })
            .await
        }
    }

    pub(super) fn record_metadata(target: &KafkaReference) -> FileMetadata {
        let mut meta = FileMetadata {
            path: target.to_string(),
            name: format!("kafka-msg-{}", target.offset),
            size_bytes: 0,
            last_modified_utc: Utc::now(),
            created_utc: None,
            content_type: "application/json".to_string(),
            extra: Default::default(),
        };
        meta.extra.insert("KafkaTopic".to_string(), target.topic.clone());
        meta.extra.insert("KafkaPartition".to_string(), target.partition.to_string());
        meta.extra.insert("KafkaOffset".to_string(), target.offset.to_string());
        meta
    }

    fn map_kafka_error(e: KafkaError, config: &KafkaConfig, reference: &str) -> IngestionError {
        match e.rdkafka_error_code() {
            Some(RDKafkaErrorCode::UnknownTopicOrPartition | RDKafkaErrorCode::UnknownPartition | RDKafkaErrorCode::UnknownTopic) => {
                IngestionError::not_found(reference)
            }
            Some(RDKafkaErrorCode::OperationTimedOut | RDKafkaErrorCode::RequestTimedOut) => IngestionError::Timeout {
                operation: format!("kafka {reference}"),
                elapsed: POLL_CEILING,
            },
            _ => IngestionError::connection(&config.bootstrap_servers, e),
        }
    }

    #[cfg(test)]
    mod tests {
        use super::{KafkaConfig, record_metadata};
        use crate::connectors::KafkaReference;
        use crate::types::{SourceDescriptor, SourceType};

        #[test]
        fn config_defaults() {
            let cfg = KafkaConfig::from_source(&SourceDescriptor::new(SourceType::Kafka, "orders")).unwrap();
            assert_eq!(cfg.bootstrap_servers, "localhost:9092");
            assert_eq!(cfg.consumer_group, "file-discovery-service");
            assert_eq!(cfg.max_messages_to_list, 100);
        }

        #[test]
        fn record_metadata_carries_coordinates() {
            let meta = record_metadata(&KafkaReference::parse("orders:2:17").unwrap());
            assert_eq!(meta.name, "kafka-msg-17");
            assert_eq!(meta.content_type, "application/json");
            assert_eq!(meta.extra["KafkaPartition"], "2");
            assert_eq!(meta.extra["KafkaOffset"], "17");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::stream::{self, StreamExt};
    use tokio_util::sync::CancellationToken;

    use super::{KafkaReference, drain_references};
    use crate::error::ErrorKind;

    fn records(refs: &[&str]) -> Vec<Result<KafkaReference, &'static str>> {
        refs.iter().map(|r| Ok(KafkaReference::parse(r).unwrap())).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn every_drained_record_is_listed() {
        let polled = stream::iter(records(&["orders:0:5", "orders:1:6", "orders:0:7"]));
        let listed = drain_references(polled, 100, Duration::from_secs(5), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(listed, ["orders:0:5", "orders:1:6", "orders:0:7"]);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_stops_at_max_and_on_idle_poll() {
        let polled = stream::iter(records(&["t:0:1", "t:0:2", "t:0:3"]));
        let listed = drain_references(polled, 2, Duration::from_secs(5), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(listed, ["t:0:1", "t:0:2"]);

        let polled = stream::iter(records(&["t:0:1"])).chain(stream::pending());
        let listed = drain_references(polled, 10, Duration::from_secs(1), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(listed, ["t:0:1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_keeps_references_gathered_so_far() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let polled = stream::iter(records(&["t:0:1", "t:0:2"])).chain(stream::pending());
        let listed = drain_references(polled, 10, Duration::from_secs(60), &cancel).await.unwrap();
        assert_eq!(listed, ["t:0:1", "t:0:2"]);
    }

    #[tokio::test]
    async fn poll_error_fails_the_listing() {
        let mut polled = records(&["t:0:1"]);
        polled.push(Err("broker down"));
        let err = drain_references(stream::iter(polled), 10, Duration::from_secs(5), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, "broker down");
    }

    #[test]
    fn parses_three_part_references() {
        let r = KafkaReference::parse("orders:3:42").unwrap();
        assert_eq!((r.topic.as_str(), r.partition, r.offset), ("orders", 3, 42));
        assert_eq!(r.to_string(), "orders:3:42");
    }

    #[test]
    fn rejects_malformed_references() {
        for bad in ["orders", "orders:1", "orders:1:2:3", ":1:2", "orders:x:2", "orders:1:y", "orders:-1:0"] {
            assert_eq!(
                KafkaReference::parse(bad).unwrap_err().kind(),
                ErrorKind::InvalidArgument,
                "{bad}"
            );
        }
    }
}
