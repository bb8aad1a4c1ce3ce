fn main() {
    // migrations are embedded by `sqlx::migrate!`
    println!("cargo:rerun-if-changed=migrations");
}
