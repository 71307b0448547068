// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Edge Agent Authors

#![deny(clippy::all)]

mod backoff;
mod config;
mod error;
mod handlers;
mod health;
mod keystore;
mod lifecycle;
mod registry;
mod runtime;
mod state;
mod types;
mod unpacker;
mod version;

use std::path::PathBuf;
use std::sync::Arc;

use actix_web::{web, App, HttpServer};
use clap::Parser;

use crate::backoff::Backoff;
use crate::config::Config;
use crate::keystore::KeyStore;
use crate::lifecycle::LifecycleManager;
use crate::runtime::compose::ComposeRuntime;

#[derive(Parser, Debug)]
#[clap(name = "capsd", about = "Edge container-application lifecycle agent")]
struct Cli {
    /// Directory containing ecs.json
    #[clap(short = 'c', long = "config", value_name = "DIR")]
    config: Option<PathBuf>,

    /// Print version information and exit
    #[clap(short = 'v', long = "version")]
    version: bool,
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    pretty_env_logger::init();

    let cli = Cli::parse();
    if cli.version {
        version::print_version();
        return Ok(());
    }

    let config_dir = match cli.config {
        Some(dir) => dir,
        None => {
            eprintln!("error: -config <dir> is required");
            std::process::exit(1);
        }
    };

    let cfg = match Config::load(&config_dir) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error loading configuration: {}", e);
            std::process::exit(1);
        }
    };

    log::info!("starting capsd {}", version::VERSION);

    let keystore = Arc::new(KeyStore::new(&cfg));
    let container_runtime: Arc<dyn crate::runtime::ProjectRuntime> =
        Arc::new(ComposeRuntime::new(cfg.docker.endpoint.clone()));
    let registry = registry::new_shared();

    let lifecycle = web::Data::new(LifecycleManager::new(
        cfg.clone(),
        keystore.clone(),
        container_runtime,
        registry.clone(),
    ));

    if let Err(e) = lifecycle.init().await {
        log::error!("boot recovery failed: {}", e);
    }

    let health_registry = registry.clone();
    let health_task = tokio::spawn(health::run(health_registry));

    let listen_address = cfg.listen_address.clone();
    let keystore_data = web::Data::from(keystore);

    let server_task = tokio::spawn(async move {
        let backoff = Backoff::new(
            std::time::Duration::from_millis(200),
            std::time::Duration::from_secs(30),
            2.0,
            0.2,
        );
        let listen_address = listen_address.clone();
        let lifecycle = lifecycle.clone();
        let keystore_data = keystore_data.clone();

        crate::backoff::retry_with_backoff(backoff, move || {
            let listen_address = listen_address.clone();
            let lifecycle = lifecycle.clone();
            let keystore_data = keystore_data.clone();
            async move { bind_and_serve(&listen_address, lifecycle, keystore_data).await }
        })
        .await;
    });

    let _ = tokio::join!(server_task, health_task);
    Ok(())
}

async fn bind_and_serve(
    listen_address: &str,
    lifecycle: web::Data<LifecycleManager>,
    keystore: web::Data<KeyStore>,
) -> std::io::Result<()> {
    let path = std::path::Path::new(listen_address);
    if path.exists() {
        std::fs::remove_file(path)?;
    }

    let server = HttpServer::new(move || {
        App::new()
            .app_data(lifecycle.clone())
            .app_data(keystore.clone())
            .wrap(actix_web::middleware::Logger::default())
            .service(web::resource("/ping").route(web::get().to(handlers::ping)))
            .service(
                web::resource("/applications")
                    .route(web::get().to(handlers::list_applications)),
            )
            .service(
                web::resource("/persistent-applications")
                    .route(web::get().to(handlers::list_persistent_applications)),
            )
            .service(
                web::resource("/application/{id}")
                    .route(web::get().to(handlers::get_application)),
            )
            .service(
                web::resource("/application/deploy")
                    .route(web::post().to(handlers::deploy_application)),
            )
            .service(
                web::resource("/application/deploy-persistent")
                    .route(web::post().to(handlers::deploy_persistent_application)),
            )
            .service(
                web::resource("/application/restart/{id}")
                    .route(web::post().to(handlers::restart_application)),
            )
            .service(
                web::resource("/application/start/{id}")
                    .route(web::post().to(handlers::start_application)),
            )
            .service(
                web::resource("/application/stop/{id}")
                    .route(web::post().to(handlers::stop_application)),
            )
            .service(
                web::resource("/application/status/{id}")
                    .route(web::get().to(handlers::status_application)),
            )
            .service(
                web::resource("/application/purge/{id}")
                    .route(web::post().to(handlers::purge_application)),
            )
            .service(
                web::resource("/application/purge-persistent/{name}")
                    .route(web::post().to(handlers::purge_persistent_application)),
            )
            .service(
                web::resource("/application/kill/{id}")
                    .route(web::post().to(handlers::kill_application)),
            )
            .service(
                web::resource("/provision/createKey")
                    .route(web::post().to(handlers::create_key)),
            )
            .service(web::resource("/provision/hasKey").route(web::get().to(handlers::has_key)))
            .service(web::resource("/provision/getKey").route(web::get().to(handlers::get_key)))
    })
    .bind_uds(listen_address)?
    .run();

    set_socket_mode(listen_address);
    // A returning `server.await` — success or failure — means the listener
    // is gone; surface it as an error so the caller's backoff loop rebinds.
    match server.await {
        Ok(()) => Err(std::io::Error::new(
            std::io::ErrorKind::Other,
            "control socket server exited",
        )),
        Err(e) => Err(e),
    }
}

fn set_socket_mode(listen_address: &str) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = std::fs::set_permissions(
            listen_address,
            std::fs::Permissions::from_mode(0o760),
        ) {
            log::warn!("failed to chmod control socket: {}", e);
        }
    }
}
