fn main() {
    if let Err(e) = room_order_notifier::run() {
        eprintln!("room-order-notifier: {e:#}");
        std::process::exit(1);
    }
}
