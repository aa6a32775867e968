use std::io::{Error, ErrorKind};
use std::sync::Arc;

use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
use chrono::{DateTime, Duration, Utc};
use log::info;

use cache_policy_rs::catalog::PolicyCatalog;
use cache_policy_rs::config::Config;
use cache_policy_rs::middleware::{attach_measurable, cache_policy_middleware};
use cache_policy_rs::policy::declaration::PolicyDeclaration;
use cache_policy_rs::{logging, Directives, TimeMeasurable};

struct Article {
    id: u32,
    updated_at: DateTime<Utc>,
}

impl TimeMeasurable for Article {
    fn last_modified(&self) -> Option<DateTime<Utc>> {
        Some(self.updated_at)
    }
}

async fn article(req: HttpRequest, id: web::Path<u32>) -> HttpResponse {
    let id = id.into_inner();
    let article = Arc::new(Article {
        id,
        updated_at: Utc::now() - Duration::days(i64::from(id)),
    });
    attach_measurable(&req, "article", article.clone());
    HttpResponse::Ok().body(format!("article {}", article.id))
}

async fn articles() -> HttpResponse {
    HttpResponse::Ok().body("articles")
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().body("ok")
}

fn catalog(config: &Config) -> Result<PolicyCatalog, Error> {
    let mut settled = Directives::new();
    settled.insert(String::from("maxAge"), 86400.into());

    PolicyCatalog::new(&config.default_declaration())
        .and_then(|catalog| catalog.scope("/articles", &PolicyDeclaration::new().with_directive("sMaxage", 60)))
        .and_then(|catalog| {
            catalog.action(
                "/articles/{id}",
                &PolicyDeclaration::new()
                    .with_directive("maxAge", 300)
                    .with_directive("mustRevalidate", true)
                    .with_override("P7D", settled)
                    .with_excluded_status(404)
                    .with_timestamped_parameter("article"),
            )
        })
        .and_then(|catalog| catalog.action("/health", &PolicyDeclaration::new().with_directive("noStore", true)))
        .map_err(|e| Error::new(ErrorKind::InvalidInput, e.to_string()))
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let config_path = std::env::var("CACHE_POLICY_CONFIG").unwrap_or_else(|_| String::from("cache_policy.yaml"));
    let config = Config::load(&config_path).map_err(|e| Error::new(ErrorKind::InvalidInput, e.to_string()))?;
    logging::init(&config).map_err(|e| Error::new(ErrorKind::Other, e.to_string()))?;

    let catalog = web::Data::new(catalog(&config)?);
    info!("Listening on {}", config.bind);

    HttpServer::new(move || {
        App::new()
            .app_data(catalog.clone())
            .wrap_fn(|req, srv| cache_policy_middleware(req, srv))
            .route("/articles", web::get().to(articles))
            .route("/articles/{id}", web::get().to(article))
            .route("/health", web::get().to(health))
    })
    .bind(&config.bind)?
    .run()
    .await
}
