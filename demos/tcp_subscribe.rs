use std::net::IpAddr;

use clap::Parser;

use futures::StreamExt;
use gpsd_dispatch::{
    client::{ClientEvent, ClientOptions, DEFAULT_PORT, GpsdClient},
    protocol::v3::{SentenceKinds, SentenceRecord},
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "127.0.0.1")]
    addr: IpAddr,
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,
    /// Also request PPS and TOFF timing sentences
    #[arg(long)]
    timing: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let options = ClientOptions::default()
        .pps(args.timing)
        .timing(args.timing);
    let client = GpsdClient::new(options);

    let mut events = client.events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ClientEvent::ConnectFailed { attempt, error, retry_in } => {
                    eprintln!("connect attempt {attempt} failed: {error} (retry in {retry_in:?})");
                }
                ClientEvent::ProtocolMismatch { major, minor } => {
                    eprintln!("daemon speaks protocol {major:?}.{minor:?}");
                }
                _ => {}
            }
        }
    });

    // GST sentences go to a callback, the rest to a stream
    client
        .subscribe_fn(SentenceKinds::GST, |record| {
            let SentenceRecord::Gst(gst) = record else {
                return Err("expected GST");
            };
            println!(
                "Pseudorange noise: rms {:.2} m, lat err {:.2} m, lon err {:.2} m, alt err {:.2} m",
                gst.rms, gst.lat, gst.lon, gst.alt
            );
            Ok(())
        })
        .unwrap();
    let mut stream = client
        .subscribe(SentenceKinds::TPV | SentenceKinds::SKY | SentenceKinds::VERSION)
        .unwrap();

    client
        .connect(format!("{}:{}", args.addr, args.port))
        .unwrap();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            record = stream.next() => match record {
                Some(SentenceRecord::Tpv(tpv)) => {
                    if tpv.is_present("lat") && tpv.is_present("lon") {
                        println!(
                            "Current position: lat {:6.3}, lon {:6.3} ({:?})",
                            tpv.lat, tpv.lon, tpv.fix_mode()
                        );
                    }
                }
                Some(SentenceRecord::Sky(sky)) => {
                    println!(
                        "Satellites in view: {:?}, used: {:?}, hdop {:.1}",
                        sky.n_sat, sky.u_sat, sky.hdop
                    );
                }
                Some(SentenceRecord::Version(version)) => {
                    println!("GPSD Version: {}", version.release.unwrap_or_default());
                }
                Some(_) => {}
                None => break,
            },
        }
    }

    client.close().await;
}
