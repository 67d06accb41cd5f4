#[macro_use]
extern crate rocket;

use anyhow::Result;
use clap::Parser;
use rocket::http::Status;
use rocket::response::status;
use rocket::serde::json::Json;
use rocket::State;
use serde_derive::Serialize;
use std::sync::Arc;
use tracing::{event, Level};

use apollon::analyzer::{self, Analyzer};
use apollon::defs::{Edge, Kind, PrefixRow, ServerArgs};
use apollon::error::AnalyzeError;

const INDEX_ROWS: usize = 5;

struct Served {
    analyzer: Arc<dyn Analyzer>,
    default_prefix: String,
}

#[derive(Serialize)]
struct RankedEdge {
    row: usize,
    percentage: Option<f64>,
    #[serde(flatten)]
    edge: Edge,
}

type Answer<T> = Result<Json<T>, status::Custom<String>>;

fn reject(e: AnalyzeError) -> status::Custom<String> {
    let status = match e {
        AnalyzeError::InvalidKind(_) | AnalyzeError::InvalidPattern { .. } => Status::BadRequest,
        _ => Status::BadGateway,
    };
    status::Custom(status, e.to_string())
}

// store queries block on http, keep them off the async workers.
async fn prefix_rows(served: &Served, prefix: String, n: usize) -> Answer<Vec<PrefixRow>> {
    let analyzer = Arc::clone(&served.analyzer);
    let rows = rocket::tokio::task::spawn_blocking(move || analyzer.top_by_caller_prefix(n, &prefix))
        .await
        .map_err(|e| status::Custom(Status::InternalServerError, e.to_string()))?;
    rows.map(Json).map_err(reject)
}

#[get("/")]
async fn index(served: &State<Served>) -> Answer<Vec<PrefixRow>> {
    prefix_rows(served, served.default_prefix.clone(), INDEX_ROWS).await
}

#[get("/prefix/<prefix>/<n>")]
async fn prefix_calls(prefix: &str, n: usize, served: &State<Served>) -> Answer<Vec<PrefixRow>> {
    prefix_rows(served, prefix.to_string(), n).await
}

#[get("/top/<kind>/<n>")]
fn top_calls(kind: &str, n: usize, served: &State<Served>) -> Answer<Vec<RankedEdge>> {
    let kind: Kind = kind.parse().map_err(reject)?;
    let analyzer = &served.analyzer;
    Ok(Json(
        analyzer
            .top(n, kind)
            .into_iter()
            .enumerate()
            .map(|(i, edge)| RankedEdge {
                row: i + 1,
                percentage: analyzer.percentage(edge, kind),
                edge: edge.clone(),
            })
            .collect(),
    ))
}

#[get("/first")]
fn first_call(served: &State<Served>) -> Option<Json<Edge>> {
    served.analyzer.first().cloned().map(Json)
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = ServerArgs::parse();
    apollon::init_tracing(args.log_level);

    let analyzer: Arc<dyn Analyzer> = Arc::from(analyzer::open(&args.trace, &args.store)?);
    event!(Level::INFO, "serving {} call edges on port {}", analyzer.index().len(), args.port);

    let figment = rocket::Config::figment().merge(("port", args.port));
    // the ignited rocket, and with it any blocking store client, is dropped
    // after the runtime has shut down.
    let _rocket = rocket::execute(
        rocket::custom(figment)
            .manage(Served {
                analyzer,
                default_prefix: args.default_prefix,
            })
            .mount("/", routes![index, prefix_calls, top_calls, first_call])
            .launch(),
    )
    .map_err(|e| anyhow::anyhow!("server failed: {}", e))?;
    Ok(())
}
