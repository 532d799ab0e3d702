use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::bail;
use bytes::Bytes;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, trace, warn, Instrument, Span};

use crate::backlog::Backlog;
use crate::call::call::Call;
use crate::call::method_invocation::MethodInvocation;
use crate::call::peer_info::PeerInfo;
use crate::call::rpc_result::{FailureKind, RpcResult};
use crate::channel::config::ChannelConfig;
use crate::channel::connection::DuplexConnection;
use crate::channel::executed_calls::{Disposition, ExecutedCalls};
use crate::channel::executor::MethodExecutor;
use crate::channel::outbox::Outbox;
use crate::util::buf::MAX_LEN_PREFIXED;
use crate::wire::{peek_method_id, FrameKind};


/// The call that is currently on the wire, plus the earliest time the next attempt may be sent
#[derive(Default)]
struct InFlight {
    call: Option<Call>,
    retry_not_before: Option<Instant>,
}


/// The engine for one physical connection to one remote peer. It sends queued calls one at a
///  time, retrying them according to their retry strategy, and executes calls coming in from the
///  peer, sending back their results.
///
/// A channel runs once: after [PeerChannel::start] returns, the connection is closed and the
///  channel is discarded. Pending calls live in the [Outbox] which the owner can hand to the next
///  channel for the same peer.
pub struct PeerChannel {
    peer_info: PeerInfo,
    connection: Arc<dyn DuplexConnection>,
    executor: Arc<dyn MethodExecutor>,
    outbox: Arc<Outbox>,
    executed_calls: Arc<ExecutedCalls>,
    in_flight: Mutex<InFlight>,
    outbound_results: Mutex<VecDeque<RpcResult>>,
    cancel: CancellationToken,
}

impl PeerChannel {
    pub fn new(
        peer_info: PeerInfo,
        connection: Arc<dyn DuplexConnection>,
        executor: Arc<dyn MethodExecutor>,
        outbox: Arc<Outbox>,
        executed_calls: Arc<ExecutedCalls>,
        cancel: CancellationToken,
    ) -> PeerChannel {
        PeerChannel {
            peer_info,
            connection,
            executor,
            outbox,
            executed_calls,
            in_flight: Default::default(),
            outbound_results: Default::default(),
            cancel,
        }
    }

    /// Creates a standalone channel with its own outbox and executed calls cache
    pub async fn create(
        peer_info: PeerInfo,
        connection: Arc<dyn DuplexConnection>,
        executor: Arc<dyn MethodExecutor>,
        backlog: Option<Arc<dyn Backlog>>,
        config: Arc<ChannelConfig>,
    ) -> anyhow::Result<Arc<PeerChannel>> {
        let executed_calls = Arc::new(ExecutedCalls::new(config.executed_cache_size));
        let outbox = Arc::new(Outbox::create(peer_info.peer_id.clone(), backlog, config).await?);
        Ok(Arc::new(PeerChannel::new(peer_info, connection, executor, outbox, executed_calls, CancellationToken::new())))
    }

    pub fn peer_info(&self) -> &PeerInfo {
        &self.peer_info
    }

    pub fn outbox(&self) -> &Arc<Outbox> {
        &self.outbox
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Runs the channel until it is stopped, the connection is closed, or an error occurs. The
    ///  connection is closed when this returns.
    pub async fn start(self: &Arc<Self>) {
        let span = info_span!("peer_channel", peer = ?self.peer_info);
        async {
            info!("starting channel");

            let send_loop = async {
                let result = self.send_loop().await;
                self.cancel.cancel();
                result
            };
            let receive_loop = async {
                let result = self.receive_loop().await;
                self.cancel.cancel();
                result
            };
            let (send_result, receive_result) = tokio::join!(send_loop, receive_loop);

            if let Err(e) = send_result {
                warn!("send loop terminated with an error: {:#}", e);
            }
            if let Err(e) = receive_result {
                warn!("receive loop terminated with an error: {:#}", e);
            }

            self.connection.close().await;
            info!("channel stopped");
        }
            .instrument(span)
            .await
    }

    /// Requests both loops to stop. Queued calls are unaffected.
    pub fn stop(&self) {
        debug!("stop requested for channel to {:?}", self.peer_info);
        self.cancel.cancel();
    }

    /// Sends a call to the peer, waiting for its outcome or its timeout - see [Outbox::run]
    pub async fn run(&self, call: Call) -> RpcResult {
        self.outbox.run(call).await
    }

    async fn send_loop(&self) -> anyhow::Result<()> {
        let config = self.outbox.config().clone();

        while self.connection.is_open() && !self.cancel.is_cancelled() {
            let mut did_work = self.send_outbound_results().await?;
            did_work |= self.finish_current_call(&config).await?;
            did_work |= self.send_next_call().await?;

            if !did_work {
                let wait = self.idle_wait(&config);
                tokio::select! {
                    _ = self.cancel.cancelled() => {}
                    _ = self.outbox.woken() => {}
                    _ = tokio::time::sleep(wait) => {}
                }
            }
        }
        Ok(())
    }

    async fn send_outbound_results(&self) -> anyhow::Result<bool> {
        let mut did_work = false;
        while let Some(result) = self.pop_outbound_result() {
            trace!("sending result {:?}", result);
            self.send_frame(self.encode_result(result)).await?;
            did_work = true;
        }
        Ok(did_work)
    }

    /// A result that does not fit into a frame is replaced by a failure. Executing the call again
    ///  would produce the same result, so the failure is not retryable.
    fn encode_result(&self, result: RpcResult) -> Bytes {
        let frame = result.encode();
        let max_frame_len = self.connection.max_frame_len();
        if frame.len() <= max_frame_len {
            return frame;
        }

        warn!("result of call #{} has {} bytes, which exceeds the maximum frame length of {} - sending a failure instead", result.method_id, frame.len(), max_frame_len);
        RpcResult::failure(result.method_id, FailureKind::RemoteException, format!("result of {} bytes exceeds the maximum frame length", frame.len()))
            .encode()
    }

    /// Times out the current call if its deadline passed, and handles the current call's result
    ///  if there is one: either prepare a retry or dequeue it for good.
    async fn finish_current_call(&self, config: &ChannelConfig) -> anyhow::Result<bool> {
        let (call, result) = {
            let mut in_flight = self.lock_in_flight();
            let Some(call) = in_flight.call.as_mut() else {
                return Ok(false);
            };

            if call.result().is_none() {
                match call.deadline(config.default_timeout) {
                    Some(deadline) if Instant::now() >= deadline => {
                        debug!("call #{} timed out", call.method_id());
                        let timeout = call.effective_timeout(config.default_timeout);
                        call.set_result(RpcResult::failure(call.method_id(), FailureKind::Timeout, format!("no result after {:?}", timeout)));
                    }
                    _ => return Ok(false),
                }
            }

            let Some(mut call) = in_flight.call.take() else {
                return Ok(false);
            };
            let Some(result) = call.take_result() else {
                return Ok(false);
            };

            if result.is_retryable_failure() && call.is_retryable() {
                debug!("call #{} failed with {:?} - retrying", call.method_id(), result);
                in_flight.retry_not_before = Some(Instant::now() + config.retry_delay);
                return Ok(true);
            }
            (call, result)
        };

        trace!("call #{} is done: {:?}", call.method_id(), result);
        self.outbox.queue().dequeue_if_head(call.method_id()).await?;

        if !self.outbox.open_calls().complete(result.clone()) {
            debug!("nobody is waiting for the result of call #{} any more", call.method_id());
        }
        if let Some(listener) = &config.outcome_listener {
            listener.on_outcome(&call, &result);
        }
        Ok(true)
    }

    async fn send_next_call(&self) -> anyhow::Result<bool> {
        {
            let in_flight = self.lock_in_flight();
            if in_flight.call.is_some() {
                return Ok(false);
            }
            if let Some(retry_not_before) = in_flight.retry_not_before {
                if Instant::now() < retry_not_before {
                    return Ok(false);
                }
            }
        }

        let Some(mut call) = self.outbox.queue().peek().await else {
            return Ok(false);
        };

        // the call is registered as current before it is sent so that a fast result finds it
        call.mark_started(Instant::now());
        let frame = call.invocation().encode();

        let max_frame_len = self.connection.max_frame_len();
        let too_long = frame.len() > max_frame_len;
        if too_long {
            warn!("call #{} has {} bytes, which exceeds the maximum frame length of {} - failing it", call.method_id(), frame.len(), max_frame_len);
            call.set_result(RpcResult::failure(call.method_id(), FailureKind::Other, format!("call of {} bytes exceeds the maximum frame length", frame.len())));
        }
        else {
            trace!("sending call #{} {:?}", call.method_id(), call.method_name());
        }

        {
            let mut in_flight = self.lock_in_flight();
            in_flight.call = Some(call);
            in_flight.retry_not_before = None;
        }

        if !too_long {
            self.send_frame(frame).await?;
        }
        Ok(true)
    }

    /// how long the send loop may sleep if there is nothing to do right now
    fn idle_wait(&self, config: &ChannelConfig) -> Duration {
        let now = Instant::now();
        let in_flight = self.lock_in_flight();

        let wake_up_at = in_flight.call.as_ref()
            .and_then(|c| c.deadline(config.default_timeout))
            .into_iter()
            .chain(in_flight.retry_not_before)
            .min();

        match wake_up_at {
            Some(at) => config.idle_wait.min(at.saturating_duration_since(now)),
            None => config.idle_wait,
        }
    }

    async fn send_frame(&self, frame: Bytes) -> anyhow::Result<()> {
        tokio::select! {
            _ = self.cancel.cancelled() => Ok(()),
            result = self.connection.send(frame) => result,
        }
    }

    async fn receive_loop(self: &Arc<Self>) -> anyhow::Result<()> {
        while self.connection.is_open() {
            let frame = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                frame = self.connection.receive() => frame?,
            };
            let Some(frame) = frame else {
                debug!("connection closed by peer");
                return Ok(());
            };

            match FrameKind::peek(&frame) {
                Some(FrameKind::Method) => self.on_method_frame(&frame)?,
                Some(FrameKind::Result) => self.on_result_frame(&frame)?,
                None => bail!("received a frame that is neither a method nor a result frame ({} bytes) - closing channel", frame.len()),
            }
        }
        Ok(())
    }

    fn on_method_frame(self: &Arc<Self>, frame: &[u8]) -> anyhow::Result<()> {
        let invocation = MethodInvocation::try_deser(frame)?;
        trace!("received call #{} {:?}", invocation.id, invocation.name);

        match self.executed_calls.admit(invocation.id) {
            Disposition::Execute => {
                let channel = self.clone();
                tokio::spawn(async move {
                    let result = channel.execute(invocation).await;
                    channel.executed_calls.record(result.clone());
                    channel.push_outbound_result(result);
                }.instrument(Span::current()));
            }
            Disposition::InProgress => {
                debug!("call #{} is already being executed - ignoring duplicate", invocation.id);
            }
            Disposition::Cached(result) => {
                debug!("call #{} was executed before - resending its result", invocation.id);
                self.push_outbound_result(result);
            }
            Disposition::Obsolete => {
                debug!("call #{} is older than all remembered results - rejecting it", invocation.id);
                self.push_outbound_result(RpcResult::failure(invocation.id, FailureKind::ObsoleteCommandID, ""));
            }
        }
        Ok(())
    }

    /// Executes on a separate task so that a panic in application code is contained
    async fn execute(&self, invocation: MethodInvocation) -> RpcResult {
        let method_id = invocation.id;
        let executor = self.executor.clone();
        let peer_info = self.peer_info.clone();

        let execution = tokio::spawn(async move {
            executor.execute(&invocation, &peer_info).await
        }.instrument(Span::current()));

        match execution.await {
            Ok(Ok(return_value)) if return_value.len() > MAX_LEN_PREFIXED => {
                warn!("call #{} returned {} bytes, which the wire format cannot express", method_id, return_value.len());
                RpcResult::failure(method_id, FailureKind::RemoteException, "return value is too long")
            }
            Ok(Ok(return_value)) => RpcResult::success(method_id, return_value),
            Ok(Err(e)) => {
                debug!("call #{} failed: {:#}", method_id, e);
                let mut message = e.to_string();
                if message.len() > MAX_LEN_PREFIXED {
                    message = "failure message is too long".to_string();
                }
                RpcResult::failure(method_id, FailureKind::RemoteException, message)
            }
            Err(e) => {
                warn!("execution of call #{} panicked: {}", method_id, e);
                RpcResult::failure(method_id, FailureKind::RemoteException, "method execution panicked")
            }
        }
    }

    fn on_result_frame(&self, frame: &[u8]) -> anyhow::Result<()> {
        let Some(method_id) = peek_method_id(frame) else {
            bail!("received a result frame without a method id ({} bytes) - closing channel", frame.len());
        };

        let result = match RpcResult::try_deser(frame) {
            Ok(result) => result,
            Err(e) => {
                warn!("received a malformed result for call #{}: {:#}", method_id, e);
                RpcResult::failure(method_id, FailureKind::RpcError, format!("malformed result: {:#}", e))
            }
        };

        let attached = {
            let mut in_flight = self.lock_in_flight();
            match in_flight.call.as_mut() {
                Some(call) if call.method_id() == method_id && call.result().is_none() => {
                    call.set_result(result);
                    true
                }
                _ => false,
            }
        };

        if attached {
            self.outbox.wake();
        }
        else {
            warn!("received a result for call #{} which is not the current call - ignoring", method_id);
        }
        Ok(())
    }

    fn push_outbound_result(&self, result: RpcResult) {
        self.outbound_results.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(result);
        self.outbox.wake();
    }

    fn pop_outbound_result(&self) -> Option<RpcResult> {
        self.outbound_results.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, InFlight> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
