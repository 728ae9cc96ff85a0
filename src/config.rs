use std::env;

use anyhow::{Context, Result};

const DEFAULT_PACKET_API_URL: &str = "https://api.packet.net/";
const DEFAULT_CONCURRENT_FETCHES: usize = 4;
const DEFAULT_FETCH_PER_PAGE: u32 = 50;
const DEFAULT_GRPC_PORT: u16 = 42111;
const DEFAULT_HTTP_PORT: u16 = 42112;

#[derive(Clone, Debug)]
pub struct Config {
	pub facility: String,
	pub packet_api_url: String,
	pub packet_consumer_token: String,
	pub packet_api_auth_token: String,
	pub cacher_tls_cert: Option<String>,
	pub concurrent_fetches: usize,
	pub fetch_per_page: u32,
	pub grpc_port: u16,
	pub http_port: u16,
}

impl Config {
	pub fn from_env() -> Result<Self> {
		let facility = env::var("FACILITY").context("FACILITY must be set")?;

		let packet_api_url =
			env::var("PACKET_API_URL").unwrap_or_else(|_| DEFAULT_PACKET_API_URL.to_string());
		let packet_consumer_token = env::var("PACKET_CONSUMER_TOKEN").unwrap_or_default();
		let packet_api_auth_token = env::var("PACKET_API_AUTH_TOKEN").unwrap_or_default();
		let cacher_tls_cert = env::var("CACHER_TLS_CERT").ok();

		let concurrent_fetches =
			parse_env_or("CACHER_CONCURRENT_FETCHES", DEFAULT_CONCURRENT_FETCHES).clamp(1, 64);
		let fetch_per_page = parse_env_or("CACHER_FETCH_PER_PAGE", DEFAULT_FETCH_PER_PAGE).clamp(1, 1000);
		let grpc_port = parse_env_or("GRPC_PORT", DEFAULT_GRPC_PORT);
		let http_port = parse_env_or("HTTP_PORT", DEFAULT_HTTP_PORT);

		Ok(Config {
			facility,
			packet_api_url,
			packet_consumer_token,
			packet_api_auth_token,
			cacher_tls_cert,
			concurrent_fetches,
			fetch_per_page,
			grpc_port,
			http_port,
		})
	}
}

fn parse_env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
	env::var(name)
		.ok()
		.and_then(|v| v.parse().ok())
		.unwrap_or(default)
}
