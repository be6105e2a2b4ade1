use depot::web;

#[rocket::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let app = web::build_app().ignite().await?;

    let sweeper = web::spawn_sweeper(&app)
        .await
        .ok_or("Cannot start the sweeper, connection pool or storage missing")?;

    let launched = app.launch().await;
    sweeper.stop().await;
    launched?;

    Ok(())
}
