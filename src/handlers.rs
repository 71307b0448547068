// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Edge Agent Authors

//! Control-surface HTTP handlers: key provisioning, application deploy and
//! lifecycle control, and status queries, wired up on top of actix-web.

use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use futures::{StreamExt, TryStreamExt};
use serde::Deserialize;

use crate::error::Error;
use crate::keystore::KeyStore;
use crate::lifecycle::LifecycleManager;
use crate::types::{
    AppDetails, Applications, BasicResponse, DeployResponse, Metadata, PersistentApplications,
    STATUS_FAIL, STATUS_OK,
};

#[derive(Deserialize)]
pub struct CreateKeyRequest {
    pub name: String,
}

pub async fn create_key(
    keystore: web::Data<KeyStore>,
    req: web::Json<CreateKeyRequest>,
) -> HttpResponse {
    basic(keystore.provision(&req.name))
}

pub async fn has_key(keystore: web::Data<KeyStore>) -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "hasKey": keystore.has_key() }))
}

pub async fn get_key(keystore: web::Data<KeyStore>) -> HttpResponse {
    match keystore.public_key_pem() {
        Ok(pub_key) => HttpResponse::Ok().json(serde_json::json!({ "pubKey": pub_key })),
        Err(e) => error_response(e),
    }
}

pub async fn ping() -> HttpResponse {
    HttpResponse::Ok().json(BasicResponse::ok())
}

pub async fn list_applications(lm: web::Data<LifecycleManager>) -> HttpResponse {
    let applications = lm.list_applications().await;
    HttpResponse::Ok().json(Applications { applications })
}

pub async fn list_persistent_applications(lm: web::Data<LifecycleManager>) -> HttpResponse {
    let persistent_applications = lm.list_persistent_applications().await;
    HttpResponse::Ok().json(PersistentApplications {
        persistent_applications,
    })
}

pub async fn get_application(
    lm: web::Data<LifecycleManager>,
    path: web::Path<String>,
) -> HttpResponse {
    let id = path.into_inner();
    match lm.get_application(&id).await {
        Ok(details) => HttpResponse::Ok().json(details),
        Err(e) => error_response(e),
    }
}

async fn read_multipart_deploy(mut payload: Multipart) -> Result<(Metadata, Vec<u8>), Error> {
    let mut metadata: Option<Metadata> = None;
    let mut artifact: Vec<u8> = Vec::new();

    while let Some(item) = payload.try_next().await.map_err(|e| Error::Config(e.to_string()))? {
        let mut field = item;
        let name = field
            .content_disposition()
            .get_name()
            .unwrap_or("")
            .to_string();
        let mut bytes = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk = chunk.map_err(|e| Error::Config(e.to_string()))?;
            bytes.extend_from_slice(&chunk);
        }
        match name.as_str() {
            "metadata" => {
                metadata = Some(
                    serde_json::from_slice(&bytes)
                        .map_err(|e| Error::Config(format!("bad metadata: {}", e)))?,
                );
            }
            "artifact" => artifact = bytes,
            _ => {}
        }
    }

    let metadata = metadata.ok_or_else(|| Error::Config("missing metadata field".into()))?;
    if artifact.is_empty() {
        return Err(Error::Config("missing artifact field".into()));
    }
    Ok((metadata, artifact))
}

async fn deploy(lm: web::Data<LifecycleManager>, payload: Multipart, persistent: bool) -> HttpResponse {
    let (metadata, artifact) = match read_multipart_deploy(payload).await {
        Ok(v) => v,
        Err(e) => {
            return HttpResponse::BadRequest().json(DeployResponse {
                uuid: String::new(),
                name: String::new(),
                version: String::new(),
                status: STATUS_FAIL,
                error: e.to_string(),
            })
        }
    };

    match lm.deploy(metadata, artifact.as_slice(), persistent).await {
        Ok(app) => HttpResponse::Ok().json(DeployResponse {
            uuid: app.uuid,
            name: app.name,
            version: app.version,
            status: STATUS_OK,
            error: String::new(),
        }),
        Err(e) => HttpResponse::build(e.status_code()).json(DeployResponse {
            uuid: String::new(),
            name: String::new(),
            version: String::new(),
            status: STATUS_FAIL,
            error: e.to_string(),
        }),
    }
}

pub async fn deploy_application(lm: web::Data<LifecycleManager>, payload: Multipart) -> HttpResponse {
    deploy(lm, payload, false).await
}

pub async fn deploy_persistent_application(
    lm: web::Data<LifecycleManager>,
    payload: Multipart,
) -> HttpResponse {
    deploy(lm, payload, true).await
}

pub async fn restart_application(
    lm: web::Data<LifecycleManager>,
    path: web::Path<String>,
) -> HttpResponse {
    basic(lm.restart(&path.into_inner()).await)
}

pub async fn start_application(
    lm: web::Data<LifecycleManager>,
    path: web::Path<String>,
) -> HttpResponse {
    basic(lm.start(&path.into_inner()).await)
}

pub async fn stop_application(
    lm: web::Data<LifecycleManager>,
    path: web::Path<String>,
) -> HttpResponse {
    basic(lm.stop(&path.into_inner()).await)
}

pub async fn status_application(
    lm: web::Data<LifecycleManager>,
    path: web::Path<String>,
) -> HttpResponse {
    match lm.get_application(&path.into_inner()).await {
        Ok(details) => HttpResponse::Ok().json(BasicResponse {
            status: details.status,
            error: String::new(),
        }),
        Err(e) => error_response(e),
    }
}

pub async fn purge_application(
    lm: web::Data<LifecycleManager>,
    path: web::Path<String>,
) -> HttpResponse {
    basic(lm.undeploy(&path.into_inner()).await)
}

pub async fn purge_persistent_application(
    lm: web::Data<LifecycleManager>,
    path: web::Path<String>,
) -> HttpResponse {
    basic(lm.purge_persistent(&path.into_inner()).await)
}

pub async fn kill_application(
    lm: web::Data<LifecycleManager>,
    path: web::Path<String>,
) -> HttpResponse {
    basic(lm.kill(&path.into_inner()).await)
}

fn basic(result: Result<(), Error>) -> HttpResponse {
    match result {
        Ok(()) => HttpResponse::Ok().json(BasicResponse::ok()),
        Err(e) => HttpResponse::build(e.status_code()).json(BasicResponse::fail(e)),
    }
}

fn error_response(e: Error) -> HttpResponse {
    HttpResponse::build(e.status_code()).json(BasicResponse::fail(e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[actix_rt::test]
    async fn test_ping_returns_ok() {
        let resp = ping().await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::OK);
    }
}
