use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use util::vnet::net::Net;

use crate::agent::agent_config::{InterfaceFilterFn, IpFilterFn};
use crate::candidate::*;
use crate::error::*;
use crate::external_ip_mapper::ExternalIpMapper;
use crate::mdns::MulticastDnsMode;
use crate::network_type::NetworkType;
use crate::proxy::ProxyDialer;
use crate::state::GatheringState;
use crate::tcp_mux::TCPMux;
use crate::udp_mux::{UDPMux, UDPMuxSrflx};
use crate::url::Url;

/// Handler notified for every discovered candidate; `None` signals the
/// end of the gather session.
pub type OnCandidateHdlrFn = Box<
    dyn (FnMut(
            Option<Arc<dyn Candidate + Send + Sync>>,
        ) -> Pin<Box<dyn Future<Output = ()> + Send + 'static>>)
        + Send
        + Sync,
>;

/// State shared between the public `Agent` handle and the gathering tasks.
pub(crate) struct AgentInternal {
    // Configuration, fixed for the lifetime of the agent.
    pub(crate) candidate_types: Vec<CandidateType>,
    pub(crate) urls: Vec<Url>,
    pub(crate) network_types: Vec<NetworkType>,
    pub(crate) port_min: u16,
    pub(crate) port_max: u16,
    pub(crate) local_ufrag: String,
    pub(crate) local_pwd: String,
    pub(crate) mdns_mode: MulticastDnsMode,
    pub(crate) mdns_name: String,
    pub(crate) interface_filter: Arc<Option<InterfaceFilterFn>>,
    pub(crate) ip_filter: Arc<Option<IpFilterFn>>,
    pub(crate) include_loopback: bool,
    pub(crate) insecure_skip_verify: bool,
    pub(crate) ext_ip_mapper: Arc<Option<ExternalIpMapper>>,
    pub(crate) net: Arc<Net>,
    pub(crate) udp_mux: Option<Arc<dyn UDPMux + Send + Sync>>,
    pub(crate) udp_mux_srflx: Option<Arc<dyn UDPMuxSrflx + Send + Sync>>,
    pub(crate) tcp_mux: Option<Arc<dyn TCPMux + Send + Sync>>,
    pub(crate) proxy_dialer: Option<Arc<dyn ProxyDialer + Send + Sync>>,

    // Mutable agent state; reached only through the accessors below so
    // every mutation serialises on the owning lock.
    pub(crate) gathering_state: Arc<AtomicU8>,
    pub(crate) on_candidate_hdlr: Arc<ArcSwapOption<Mutex<OnCandidateHdlrFn>>>,
    pub(crate) local_candidates: Mutex<Vec<Arc<dyn Candidate + Send + Sync>>>,
    pub(crate) chan_candidate_tx: mpsc::Sender<Option<Arc<dyn Candidate + Send + Sync>>>,

    /// Root cancellation domain of the agent; gather sessions derive
    /// their token from it.
    pub(crate) root_cancel: CancellationToken,
    /// Dropped when the agent closes.
    pub(crate) done_tx: Mutex<Option<broadcast::Sender<()>>>,
    /// Cancellation handle of the currently active gather session.
    pub(crate) gather_candidate_cancel: Mutex<Option<CancellationToken>>,
    /// Dropped when the active gather session completes.
    pub(crate) gather_candidate_done: Mutex<Option<broadcast::Sender<()>>>,
}

impl AgentInternal {
    /// Spawns the loop that serialises candidate delivery to the
    /// installed handler.
    pub(crate) fn start_on_candidate_routine(
        mut chan_candidate_rx: mpsc::Receiver<Option<Arc<dyn Candidate + Send + Sync>>>,
        on_candidate_hdlr: Arc<ArcSwapOption<Mutex<OnCandidateHdlrFn>>>,
    ) {
        tokio::spawn(async move {
            while let Some(candidate) = chan_candidate_rx.recv().await {
                let hdlr = on_candidate_hdlr.load();
                if let Some(hdlr) = &*hdlr {
                    let mut f = hdlr.lock().await;
                    f(candidate).await;
                }
            }
        });
    }

    pub(crate) async fn set_gathering_state(&self, new_state: GatheringState) -> Result<()> {
        let completed = GatheringState::from(self.gathering_state.load(Ordering::SeqCst))
            != new_state
            && new_state == GatheringState::Complete;

        // The state must be observable before the closing notification
        // reaches the handler.
        self.gathering_state
            .store(new_state as u8, Ordering::SeqCst);

        if completed {
            // The last candidate of a session is nil.
            self.chan_candidate_tx
                .send(None)
                .await
                .map_err(|_| Error::ErrClosed)?;
        }

        Ok(())
    }

    /// The candidate sink. Takes shared ownership of the candidate (and
    /// with it the socket the candidate owns), rejects it when the
    /// session is cancelled or the agent closed, and otherwise forwards
    /// it to the installed handler.
    pub(crate) async fn add_candidate(
        &self,
        c: &Arc<dyn Candidate + Send + Sync>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if cancel.is_cancelled() || self.done_tx.lock().await.is_none() {
            return Err(Error::ErrClosed);
        }

        {
            let mut local_candidates = self.local_candidates.lock().await;
            for cand in &*local_candidates {
                if cand.equal(&**c) {
                    log::debug!("ignoring duplicate candidate: {c}");
                    if let Err(err) = c.close().await {
                        log::warn!("failed to close duplicate candidate: {err}");
                    }
                    return Ok(());
                }
            }
            local_candidates.push(Arc::clone(c));
        }

        self.chan_candidate_tx
            .send(Some(Arc::clone(c)))
            .await
            .map_err(|_| Error::ErrClosed)?;

        Ok(())
    }

    /// Returns a receiver resolving when the agent closes, or `None` if
    /// it already has.
    pub(crate) async fn done_rx(&self) -> Option<broadcast::Receiver<()>> {
        let done_tx = self.done_tx.lock().await;
        done_tx.as_ref().map(broadcast::Sender::subscribe)
    }

    pub(crate) async fn close(&self) -> Result<()> {
        {
            let mut done_tx = self.done_tx.lock().await;
            if done_tx.is_none() {
                return Err(Error::ErrClosed);
            }
            done_tx.take();
        }

        self.root_cancel.cancel();
        {
            let mut gather_cancel = self.gather_candidate_cancel.lock().await;
            if let Some(cancel) = gather_cancel.take() {
                cancel.cancel();
            }
        }

        // Close every candidate, and with it the socket it owns.
        let candidates = {
            let mut local_candidates = self.local_candidates.lock().await;
            std::mem::take(&mut *local_candidates)
        };
        for c in candidates {
            if let Err(err) = c.close().await {
                log::warn!("failed to close candidate {c}: {err}");
            }
        }

        Ok(())
    }
}
