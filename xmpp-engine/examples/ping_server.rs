// Copyright (c) 2024 Jonas Schäfer <jonas@zombofant.net>
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Ping your server
//!
//! Connects, then sends an XEP-0199 ping to the account's server every few
//! seconds and prints how long the response took. Requests without a
//! response within the timeout are cancelled.

use std::env::args;
use std::process::exit;
use std::str::FromStr;
use std::time::{Duration, Instant};

use futures::StreamExt;

use xmpp_engine::{
    iq::IqRequest,
    jid::{BareJid, Jid},
    minidom::Element,
    Client, ClientConfig, Event,
};

#[tokio::main]
async fn main() {
    env_logger::init();

    let args: Vec<String> = args().collect();
    if args.len() != 3 {
        println!("Usage: {} <jid> <password>", args[0]);
        exit(1);
    }
    let jid = BareJid::from_str(&args[1]).expect(&format!("Invalid JID: {}", &args[1]));
    let password = &args[2];
    let domain: Jid = jid.domain().to_owned().into();

    let mut client = Client::connect(ClientConfig::new(jid, password.clone()))
        .expect("could not start client");
    match client.wait_until_ready().await {
        Ok(bound_jid) => println!("Online as {}", bound_jid),
        Err(e) => {
            println!("Connection failed: {}", e);
            exit(1);
        }
    }

    let mut ping_timer = tokio::time::interval(Duration::new(5, 0));
    let signal = tokio::signal::ctrl_c();
    tokio::pin!(signal);
    let mut stopping = false;
    loop {
        tokio::select! {
            _ = &mut signal, if !stopping => {
                log::info!("Ctrl+C pressed, shutting down cleanly.");
                stopping = true;
                client.disconnect().await.ok();
            }
            _ = ping_timer.tick(), if !stopping => {
                let ping = Element::builder("ping", "urn:xmpp:ping").build();
                let token = match client.iq(Some(domain.clone()), IqRequest::Get(ping)).await {
                    Ok(token) => token,
                    Err(e) => {
                        log::warn!("Could not send ping: {}", e);
                        continue;
                    }
                };
                let sent = Instant::now();
                // Dropping the token on timeout cancels the request.
                match tokio::time::timeout(Duration::new(3, 0), token).await {
                    Ok(Ok(response)) => println!(
                        "{} after {:?}",
                        response.attr("type").unwrap_or("?"),
                        sent.elapsed()
                    ),
                    Ok(Err(e)) => println!("ping failed: {}", e),
                    Err(_) => println!("ping timed out"),
                }
            }
            ev = client.next() => match ev {
                Some(Event::StateChanged(state)) => println!("state: {}", state),
                Some(event) => log::debug!("{:?}", event),
                None => break,
            }
        }
    }
}
