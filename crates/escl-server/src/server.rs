//! eSCL 서버 생명주기 — 디바이스별 리스너 관리
//!
//! [`EsclServer`]는 레지스트리에 등록된 디바이스마다 리스너를 하나
//! (보안 정책이 `Both`면 평문+TLS 한 쌍) 엽니다. `start`/`stop`은
//! 멱등이며, `stop`은 활성 잡을 모두 취소하고 정착을 제한 시간만큼만
//! 기다린 뒤 리스너를 강제로 내립니다.

use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum_server::Handle;
use axum_server::tls_rustls::RustlsConfig;
use tokio::task::JoinHandle;

use scanpost_core::device::DeviceConfig;
use scanpost_core::error::{ConfigError, ScanpostError};
use scanpost_core::metrics as m;
use scanpost_core::registry::DeviceRegistry;

use crate::advert::ServiceAdvertisement;
use crate::config::EsclServerConfig;
use crate::error::EsclServerError;
use crate::routes::{DeviceState, router};
use crate::security::load_rustls_config;

struct Listener {
    device_id: String,
    addr: SocketAddr,
    tls: bool,
    handle: Handle,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct Running {
    listeners: Vec<Listener>,
    advertisements: Vec<ServiceAdvertisement>,
}

/// eSCL 프로토콜 서버
pub struct EsclServer {
    registry: Arc<DeviceRegistry>,
    config: Arc<EsclServerConfig>,
    /// 생명주기 상태 — start/stop을 직렬화한다
    running: tokio::sync::Mutex<Option<Running>>,
}

impl EsclServer {
    /// 새 서버를 생성합니다. 리스너는 `start` 전까지 열리지 않습니다.
    pub fn new(registry: Arc<DeviceRegistry>, config: EsclServerConfig) -> Self {
        Self {
            registry,
            config: Arc::new(config),
            running: tokio::sync::Mutex::new(None),
        }
    }

    /// 등록된 모든 디바이스의 리스너를 엽니다. 멱등입니다.
    ///
    /// TLS를 여는 정책인데 인증서가 설정되지 않았으면
    /// [`ConfigError::MissingCertificate`]로 실패합니다. 하나라도
    /// 바인딩에 실패하면 이미 연 리스너를 되돌리고 에러를 반환합니다.
    pub async fn start(&self) -> Result<(), ScanpostError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            tracing::debug!("escl server already started");
            return Ok(());
        }

        let policy = self.config.security_policy;
        let rustls_config = if policy.allows_tls() {
            Some(self.load_tls_config().await?)
        } else {
            None
        };

        let mut state = Running::default();
        for device_id in self.registry.device_ids() {
            let Some(device) = self.registry.device_config(&device_id) else {
                continue;
            };

            if policy.allows_plaintext() {
                if let Err(err) = self.spawn_listener(&mut state, &device, None, device.port) {
                    shutdown_listeners(&mut state).await;
                    return Err(err.into());
                }
            }
            if let Some(tls) = &rustls_config {
                if let Err(err) =
                    self.spawn_listener(&mut state, &device, Some(tls.clone()), device.tls_port)
                {
                    shutdown_listeners(&mut state).await;
                    return Err(err.into());
                }
            }
        }

        metrics::gauge!(m::SERVER_LISTENERS).set(state.listeners.len() as f64);
        tracing::info!(
            listeners = state.listeners.len(),
            policy = %policy,
            "escl server started"
        );
        *running = Some(state);
        Ok(())
    }

    /// 모든 리스너를 내립니다. 멱등입니다.
    ///
    /// 활성 잡을 모두 취소하고 `shutdown_timeout` 동안 정착을 기다린 뒤,
    /// 정착하지 못한 잡이 있어도 리스너를 강제로 내립니다. 실패하지
    /// 않습니다.
    pub async fn stop(&self) {
        let mut running = self.running.lock().await;
        let Some(mut state) = running.take() else {
            tracing::debug!("escl server already stopped");
            return;
        };

        tracing::info!("stopping escl server, canceling active jobs");
        self.registry.cancel_all();

        let deadline = Instant::now() + self.config.shutdown_timeout;
        while self.registry.active_job_count() > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        let stragglers = self.registry.active_job_count();
        if stragglers > 0 {
            tracing::warn!(
                jobs = stragglers,
                "jobs did not settle within shutdown timeout, forcing teardown"
            );
        }

        shutdown_listeners(&mut state).await;
        metrics::gauge!(m::SERVER_LISTENERS).set(0.0);
        tracing::info!("escl server stopped");
    }

    /// 실행 중인 리스너들의 디스커버리 광고 레코드를 반환합니다.
    ///
    /// 서버가 실행 중이 아니면 빈 목록입니다.
    pub async fn advertisements(&self) -> Vec<ServiceAdvertisement> {
        self.running
            .lock()
            .await
            .as_ref()
            .map(|state| state.advertisements.clone())
            .unwrap_or_default()
    }

    /// 디바이스의 실제 바인드 주소를 반환합니다 (포트 0으로 연 경우 유용).
    pub async fn bound_addr(&self, device_id: &str, tls: bool) -> Option<SocketAddr> {
        self.running.lock().await.as_ref().and_then(|state| {
            state
                .listeners
                .iter()
                .find(|l| l.device_id == device_id && l.tls == tls)
                .map(|l| l.addr)
        })
    }

    async fn load_tls_config(&self) -> Result<RustlsConfig, ScanpostError> {
        let (Some(cert_path), Some(key_path)) = (&self.config.cert_path, &self.config.key_path)
        else {
            return Err(ConfigError::MissingCertificate {
                device: "*".to_owned(),
            }
            .into());
        };
        let config = load_rustls_config(cert_path, key_path).await?;
        Ok(config)
    }

    fn spawn_listener(
        &self,
        state: &mut Running,
        device: &DeviceConfig,
        tls: Option<RustlsConfig>,
        port: u16,
    ) -> Result<(), EsclServerError> {
        let bind_addr = format!("{}:{}", self.config.host, port);
        let listener = StdTcpListener::bind(&bind_addr).map_err(|e| EsclServerError::Bind {
            addr: bind_addr.clone(),
            reason: e.to_string(),
        })?;
        listener
            .set_nonblocking(true)
            .map_err(|e| EsclServerError::Bind {
                addr: bind_addr.clone(),
                reason: e.to_string(),
            })?;
        let addr = listener.local_addr().map_err(|e| EsclServerError::Bind {
            addr: bind_addr,
            reason: e.to_string(),
        })?;

        let is_tls = tls.is_some();
        let app = router(DeviceState {
            registry: Arc::clone(&self.registry),
            device_id: device.id.clone(),
            config: Arc::clone(&self.config),
            tls: is_tls,
            port: addr.port(),
        });

        let handle = Handle::new();
        let serve_handle = handle.clone();
        let device_id = device.id.clone();
        let task = tokio::spawn(async move {
            let result = match tls {
                Some(rustls_config) => {
                    axum_server::from_tcp_rustls(listener, rustls_config)
                        .handle(serve_handle)
                        .serve(app.into_make_service())
                        .await
                }
                None => {
                    axum_server::from_tcp(listener)
                        .handle(serve_handle)
                        .serve(app.into_make_service())
                        .await
                }
            };
            if let Err(err) = result {
                tracing::error!(device = %device_id, error = %err, "listener terminated with error");
            }
        });

        tracing::info!(
            device = %device.id,
            addr = %addr,
            tls = is_tls,
            "listener bound"
        );
        state
            .advertisements
            .push(ServiceAdvertisement::for_device(device, addr.port(), is_tls));
        state.listeners.push(Listener {
            device_id: device.id.clone(),
            addr,
            tls: is_tls,
            handle,
            task,
        });
        Ok(())
    }
}

async fn shutdown_listeners(state: &mut Running) {
    for listener in &state.listeners {
        listener.handle.shutdown();
    }
    for listener in state.listeners.drain(..) {
        if tokio::time::timeout(Duration::from_secs(1), listener.task)
            .await
            .is_err()
        {
            tracing::warn!(device = %listener.device_id, "listener task did not exit in time");
        }
    }
    state.advertisements.clear();
}
