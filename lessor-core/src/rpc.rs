//! Messaging boundary between the request-handling side and the manager.
//!
//! `call` messages carry a reply channel and block the caller until the
//! manager answers; `cast` messages are fire-and-forget. Listeners are
//! addressed by topic name on a [`MessageBus`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};

use crate::context::{self, RequestContext};
use crate::error::{ManagerError, ManagerResult, RpcError};
use crate::manager::{CreateLeaseRequest, ManagerService, UpdateLeaseRequest};
use crate::plugin::PluginInfo;
use crate::types::Lease;

const INBOX_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub enum CallMethod {
    GetLease {
        lease_id: String,
    },
    ListLeases,
    CreateLease(CreateLeaseRequest),
    UpdateLease {
        lease_id: String,
        values: UpdateLeaseRequest,
    },
    ListPlugins,
}

impl CallMethod {
    pub fn name(&self) -> &'static str {
        match self {
            CallMethod::GetLease { .. } => "get_lease",
            CallMethod::ListLeases => "list_leases",
            CallMethod::CreateLease(_) => "create_lease",
            CallMethod::UpdateLease { .. } => "update_lease",
            CallMethod::ListPlugins => "list_plugins",
        }
    }
}

#[derive(Debug, Clone)]
pub enum CastMethod {
    DeleteLease { lease_id: String },
}

#[derive(Debug, Clone)]
pub enum Reply {
    Lease(Box<Lease>),
    Leases(Vec<Lease>),
    Plugins(Vec<PluginInfo>),
}

#[derive(Debug)]
pub enum Message {
    Call {
        ctx: RequestContext,
        method: CallMethod,
        reply: oneshot::Sender<ManagerResult<Reply>>,
    },
    Cast {
        ctx: RequestContext,
        method: CastMethod,
    },
}

/// Topic name -> listener inbox
#[derive(Clone, Default)]
pub struct MessageBus {
    topics: Arc<Mutex<HashMap<String, mpsc::Sender<Message>>>>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the single listener of `topic`.
    pub fn listen(&self, topic: &str) -> Result<mpsc::Receiver<Message>, RpcError> {
        let mut topics = self
            .topics
            .lock()
            .map_err(|_| RpcError::Disconnected(topic.to_string()))?;
        if topics.get(topic).is_some_and(|tx| !tx.is_closed()) {
            return Err(RpcError::TopicTaken(topic.to_string()));
        }
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        topics.insert(topic.to_string(), tx);
        Ok(rx)
    }

    pub fn client(&self, topic: &str) -> Result<ManagerRpcClient, RpcError> {
        let topics = self
            .topics
            .lock()
            .map_err(|_| RpcError::Disconnected(topic.to_string()))?;
        let sender = topics
            .get(topic)
            .cloned()
            .ok_or_else(|| RpcError::UnknownTopic(topic.to_string()))?;
        Ok(ManagerRpcClient {
            topic: topic.to_string(),
            sender,
        })
    }
}

/// Client side of the manager API
#[derive(Clone)]
pub struct ManagerRpcClient {
    topic: String,
    sender: mpsc::Sender<Message>,
}

impl ManagerRpcClient {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    async fn call(&self, ctx: &RequestContext, method: CallMethod) -> ManagerResult<Reply> {
        let (reply, answer) = oneshot::channel();
        self.sender
            .send(Message::Call {
                ctx: ctx.clone(),
                method,
                reply,
            })
            .await
            .map_err(|_| RpcError::Disconnected(self.topic.clone()))?;
        answer
            .await
            .map_err(|_| RpcError::Disconnected(self.topic.clone()))?
    }

    async fn cast(&self, ctx: &RequestContext, method: CastMethod) -> ManagerResult<()> {
        self.sender
            .send(Message::Cast {
                ctx: ctx.clone(),
                method,
            })
            .await
            .map_err(|_| RpcError::Disconnected(self.topic.clone()))?;
        Ok(())
    }

    pub async fn get_lease(&self, ctx: &RequestContext, lease_id: &str) -> ManagerResult<Lease> {
        let method = CallMethod::GetLease {
            lease_id: lease_id.to_string(),
        };
        match self.call(ctx, method).await? {
            Reply::Lease(lease) => Ok(*lease),
            _ => Err(RpcError::UnexpectedReply("get_lease").into()),
        }
    }

    pub async fn list_leases(&self, ctx: &RequestContext) -> ManagerResult<Vec<Lease>> {
        match self.call(ctx, CallMethod::ListLeases).await? {
            Reply::Leases(leases) => Ok(leases),
            _ => Err(RpcError::UnexpectedReply("list_leases").into()),
        }
    }

    pub async fn create_lease(
        &self,
        ctx: &RequestContext,
        request: CreateLeaseRequest,
    ) -> ManagerResult<Lease> {
        match self.call(ctx, CallMethod::CreateLease(request)).await? {
            Reply::Lease(lease) => Ok(*lease),
            _ => Err(RpcError::UnexpectedReply("create_lease").into()),
        }
    }

    pub async fn update_lease(
        &self,
        ctx: &RequestContext,
        lease_id: &str,
        values: UpdateLeaseRequest,
    ) -> ManagerResult<Lease> {
        let method = CallMethod::UpdateLease {
            lease_id: lease_id.to_string(),
            values,
        };
        match self.call(ctx, method).await? {
            Reply::Lease(lease) => Ok(*lease),
            _ => Err(RpcError::UnexpectedReply("update_lease").into()),
        }
    }

    pub async fn list_plugins(&self, ctx: &RequestContext) -> ManagerResult<Vec<PluginInfo>> {
        match self.call(ctx, CallMethod::ListPlugins).await? {
            Reply::Plugins(plugins) => Ok(plugins),
            _ => Err(RpcError::UnexpectedReply("list_plugins").into()),
        }
    }

    /// Queue a lease deletion. Returns as soon as the manager has the message;
    /// the outcome is only visible in the manager's logs and store.
    pub async fn delete_lease(&self, ctx: &RequestContext, lease_id: &str) -> ManagerResult<()> {
        let method = CastMethod::DeleteLease {
            lease_id: lease_id.to_string(),
        };
        self.cast(ctx, method).await
    }
}

async fn dispatch(manager: &ManagerService, ctx: &RequestContext, method: CallMethod) -> ManagerResult<Reply> {
    match method {
        CallMethod::GetLease { lease_id } => manager
            .get_lease(ctx, &lease_id)
            .await
            .map(|l| Reply::Lease(Box::new(l))),
        CallMethod::ListLeases => manager.list_leases(ctx).await.map(Reply::Leases),
        CallMethod::CreateLease(request) => manager
            .create_lease(ctx, request)
            .await
            .map(|l| Reply::Lease(Box::new(l))),
        CallMethod::UpdateLease { lease_id, values } => manager
            .update_lease(ctx, &lease_id, values)
            .await
            .map(|l| Reply::Lease(Box::new(l))),
        CallMethod::ListPlugins => Ok(Reply::Plugins(manager.list_plugins())),
    }
}

/// Serve `inbox` until every client is gone. Each message runs on its own
/// task bound to the sender's context.
pub async fn serve(manager: ManagerService, mut inbox: mpsc::Receiver<Message>) {
    while let Some(message) = inbox.recv().await {
        let manager = manager.clone();
        match message {
            Message::Call { ctx, method, reply } => {
                let description = method.name();
                context::spawn(description, ctx, move |ctx| async move {
                    let result = dispatch(&manager, &ctx, method).await;
                    if reply.send(result).is_err() {
                        tracing::debug!(method = description, "Caller went away before the reply");
                    }
                    Ok::<(), ManagerError>(())
                });
            }
            Message::Cast {
                ctx,
                method: CastMethod::DeleteLease { lease_id },
            } => {
                context::spawn(format!("delete_lease {}", lease_id), ctx, move |ctx| async move {
                    manager.delete_lease(&ctx, &lease_id).await
                });
            }
        }
    }
    tracing::info!("Manager inbox closed");
}
