//! Configuración central de la aplicación.
//! Carga variables de entorno (.env) y expone una estructura inmutable
//! (`CONFIG`) con los tunables del dispatcher y de la cache.

use once_cell::sync::Lazy;
use std::env;
use std::time::Duration;

use molgrid_core::DispatcherConfig;

/// Configuración global de la aplicación.
pub struct AppConfig {
    pub workers: WorkerConfig,
    /// Presupuesto de la cache de artifacts en bytes.
    pub cache_budget_bytes: u64,
    pub dispatcher: DispatcherConfig,
}

/// Capacidad del pool local por clase de slot.
pub struct WorkerConfig {
    pub cpu_slots: usize,
    pub gpu_slots: usize,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// Instancia global perezosa de configuración, evaluada una sola vez.
pub static CONFIG: Lazy<AppConfig> = Lazy::new(|| {
    let defaults = DispatcherConfig::default();
    AppConfig {
        workers: WorkerConfig {
            cpu_slots: env_parse("MOLGRID_CPU_SLOTS", 4),
            gpu_slots: env_parse("MOLGRID_GPU_SLOTS", 1),
        },
        cache_budget_bytes: env_parse("MOLGRID_CACHE_BUDGET_BYTES", 64 * 1024 * 1024),
        dispatcher: DispatcherConfig {
            max_attempts: env_parse("MOLGRID_MAX_ATTEMPTS", defaults.max_attempts),
            backoff_base: Duration::from_millis(env_parse("MOLGRID_BACKOFF_BASE_MS",
                                                          defaults.backoff_base.as_millis() as u64)),
            backoff_cap: defaults.backoff_cap,
            task_deadline: Duration::from_millis(env_parse("MOLGRID_TASK_DEADLINE_MS",
                                                           defaults.task_deadline.as_millis() as u64)),
        },
    }
});
