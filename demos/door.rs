use std::net::SocketAddr;

use doorman::{
    client::Client, generate_key, server::Server, socket::DoormanSocket, token::ConnectToken,
};

const PROTOCOL_ID: u32 = 0x11223344;

fn time_now_secs_f64() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs_f64()
}

fn main() {
    env_logger::init();

    let server_addr: SocketAddr = "127.0.0.1:40007".parse().unwrap();
    let private_key = generate_key().unwrap();
    let mut server = Server::new(
        DoormanSocket::new(server_addr).unwrap(),
        PROTOCOL_ID,
        private_key,
    );

    // the issuer side: mint a token and hand its pieces to the client out-of-band
    let token = ConnectToken::generate(0x1111, server_addr, PROTOCOL_ID).unwrap();
    let token_data = token.encrypt(1, &private_key).unwrap();

    let mut client = Client::new(DoormanSocket::new("127.0.0.1:0").unwrap());
    client
        .connect(
            server_addr,
            time_now_secs_f64(),
            0x1111,
            &token_data,
            1,
            &token.client_to_server_key,
            &token.server_to_client_key,
        )
        .unwrap();

    let server_thread = std::thread::spawn(move || {
        let mut seen_client = false;
        loop {
            std::thread::sleep(std::time::Duration::from_secs_f64(1.0 / 60.0));
            server.update(time_now_secs_f64()).unwrap();
            if !seen_client && server.num_connected_clients() > 0 {
                println!("server: client {:x} connected", server.client_id(0));
                seen_client = true;
            }
            if seen_client && server.num_connected_clients() == 0 {
                println!("server: client disconnected");
                break;
            }
        }
    });

    let client_thread = std::thread::spawn(move || loop {
        std::thread::sleep(std::time::Duration::from_secs_f64(1.0 / 60.0));
        client.update(time_now_secs_f64()).unwrap();
        if client.is_connected() {
            println!("client: connected, disconnecting again");
            client.disconnect(time_now_secs_f64()).unwrap();
            break;
        }
    });

    client_thread.join().unwrap();
    server_thread.join().unwrap();
}
