use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "notify-proxy",
    version,
    about = "Proxies alert delivery to WhatsApp and Telegram"
)]
pub struct Args {
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,
    #[arg(long, default_value_t = 5000)]
    pub port: u16,
}
