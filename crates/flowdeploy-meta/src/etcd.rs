use std::sync::Arc;

use anyhow::{Context, Result};
use etcd_client::{
    Client, Compare, CompareOp, Event, EventType, GetOptions, PutOptions, ResponseHeader, Txn,
    TxnOp, WatchOptions,
};
use tokio::sync::Mutex;
use tokio_stream::wrappers::ReceiverStream;

use crate::types::{MetaStore, WatchEvent, WatchStream};

/// etcd-backed store; TTLs map onto leases.
#[derive(Clone)]
pub struct EtcdMetaStore {
    client: Arc<Mutex<Client>>,
}

impl EtcdMetaStore {
    pub async fn connect(endpoints: &[String]) -> Result<Self> {
        let c = Client::connect(endpoints, None)
            .await
            .with_context(|| format!("connect etcd {endpoints:?}"))?;
        Ok(Self {
            client: Arc::new(Mutex::new(c)),
        })
    }

    fn lease_seconds(ttl_ms: u64) -> i64 {
        ttl_ms.div_ceil(1000).max(1) as i64
    }
}

fn header_revision(header: Option<&ResponseHeader>) -> u64 {
    header.map(|h| h.revision()).unwrap_or_default() as u64
}

fn to_watch_event(ev: &Event) -> Option<WatchEvent> {
    let kv = ev.kv()?;
    let value = match ev.event_type() {
        EventType::Put => Some(kv.value().to_vec()),
        EventType::Delete => None,
    };
    Some(WatchEvent {
        key: String::from_utf8_lossy(kv.key()).to_string(),
        value,
        revision: kv.mod_revision() as u64,
    })
}

#[async_trait::async_trait]
impl MetaStore for EtcdMetaStore {
    async fn put(&self, key: &str, value: Vec<u8>, ttl_ms: Option<u64>) -> Result<u64> {
        let mut cli = self.client.lock().await;

        let opts = match ttl_ms {
            Some(ttl_ms) => {
                let lease = cli.lease_grant(Self::lease_seconds(ttl_ms), None).await?;
                Some(PutOptions::new().with_lease(lease.id()))
            }
            None => None,
        };

        let resp = cli.put(key, value, opts).await?;
        Ok(header_revision(resp.header()))
    }

    async fn get(&self, key: &str) -> Result<Option<(Vec<u8>, u64)>> {
        let mut cli = self.client.lock().await;
        let resp = cli.get(key, None).await?;
        Ok(resp
            .kvs()
            .first()
            .map(|kv| (kv.value().to_vec(), kv.mod_revision() as u64)))
    }

    async fn delete(&self, key: &str) -> Result<u64> {
        let mut cli = self.client.lock().await;
        let resp = cli.delete(key, None).await?;
        Ok(header_revision(resp.header()))
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>, u64)>> {
        let mut cli = self.client.lock().await;
        let resp = cli.get(prefix, Some(GetOptions::new().with_prefix())).await?;
        Ok(resp
            .kvs()
            .iter()
            .map(|kv| {
                (
                    String::from_utf8_lossy(kv.key()).to_string(),
                    kv.value().to_vec(),
                    kv.mod_revision() as u64,
                )
            })
            .collect())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected_revision: u64,
        value: Vec<u8>,
    ) -> Result<(bool, u64)> {
        let mut cli = self.client.lock().await;

        let cmp = Compare::mod_revision(key, CompareOp::Equal, expected_revision as i64);
        let txn = Txn::new()
            .when([cmp])
            .and_then([TxnOp::put(key, value, None)])
            .or_else([TxnOp::get(key, None)]);
        let resp = cli.txn(txn).await?;

        if resp.succeeded() {
            return Ok((true, header_revision(resp.header())));
        }

        let current = cli.get(key, None).await?;
        let current_rev = current
            .kvs()
            .first()
            .map(|kv| kv.mod_revision() as u64)
            .unwrap_or(0);
        Ok((false, current_rev))
    }

    async fn watch_prefix(
        &self,
        prefix: &str,
        start_revision_exclusive: Option<u64>,
    ) -> Result<WatchStream> {
        let mut cli = self.client.lock().await;

        let mut opts = WatchOptions::new().with_prefix();
        if let Some(min_rev) = start_revision_exclusive {
            // etcd start revisions are inclusive
            opts = opts.with_start_revision(min_rev.saturating_add(1) as i64);
        }

        let (watcher, mut stream) = cli.watch(prefix, Some(opts)).await?;
        let prefix = prefix.to_string();

        let (tx, rx) = tokio::sync::mpsc::channel::<WatchEvent>(1024);
        tokio::spawn(async move {
            // dropping the watcher cancels the server-side watch
            let _watcher = watcher;
            loop {
                let resp = match stream.message().await {
                    Ok(Some(resp)) => resp,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(prefix = %prefix, error = %e, "etcd watch stream failed");
                        break;
                    }
                };
                for ev in resp.events().iter().filter_map(to_watch_event) {
                    if tx.send(ev).await.is_err() {
                        return;
                    }
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}
