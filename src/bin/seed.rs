use chrono::{Duration, Utc};
use clap::Parser;
use fake::faker::name::en::Name;
use fake::Fake;
use sqlx::sqlite::SqlitePoolOptions;

use coursehub::{
    auth::SessionStore,
    domain::{
        CreateCouponRequest, CreateCourseRequest, CreateUserRequest, DiscountKind, UserRole,
    },
    repository::{
        CouponRepository, CourseRepository, SqliteCouponRepository, SqliteCourseRepository,
        SqliteUserRepository, UserRepository,
    },
};

#[derive(Parser)]
#[command(about = "Populate a development database with users, courses and coupons")]
struct Args {
    /// Database URL (falls back to DATABASE_URL, then sqlite:coursehub.db)
    #[arg(long)]
    database_url: Option<String>,

    /// Number of extra learner accounts to create
    #[arg(long, default_value_t = 3)]
    learners: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let database_url = args
        .database_url
        .or_else(|| std::env::var("DATABASE_URL").ok())
        .unwrap_or_else(|| "sqlite:coursehub.db?mode=rwc".to_string());

    println!("Seeding {}...", database_url);

    let db_pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await?;

    sqlx::migrate!("./migrations").run(&db_pool).await?;

    let user_repo = SqliteUserRepository::new(db_pool.clone());
    let course_repo = SqliteCourseRepository::new(db_pool.clone());
    let coupon_repo = SqliteCouponRepository::new(db_pool.clone());
    let session_store = SessionStore::new(db_pool.clone());

    // Admin account
    let admin = user_repo
        .create(CreateUserRequest {
            email: "admin@coursehub.local".to_string(),
            display_name: "Admin".to_string(),
            role: UserRole::Admin,
        })
        .await?;

    let admin_token = session_store.issue(admin.id, Duration::days(30)).await?;
    println!("  admin session token: {}", admin_token);

    // Learner accounts
    for i in 0..args.learners {
        let learner = user_repo
            .create(CreateUserRequest {
                email: format!("learner{}@coursehub.local", i + 1),
                display_name: Name().fake(),
                role: UserRole::Learner,
            })
            .await?;

        let token = session_store.issue(learner.id, Duration::days(30)).await?;
        println!("  learner {} token: {}", learner.email, token);
    }

    // Courses
    let rust_course = course_repo
        .create(CreateCourseRequest {
            title: "Practical Rust".to_string(),
            slug: "practical-rust".to_string(),
            description: "Ownership, borrowing and building real services.".to_string(),
            price_cents: 100_000,
            published: true,
            owner_id: admin.id,
        })
        .await?;

    let sql_course = course_repo
        .create(CreateCourseRequest {
            title: "SQL for Application Developers".to_string(),
            slug: "sql-for-app-devs".to_string(),
            description: "Transactions, constraints and query design.".to_string(),
            price_cents: 75_000,
            published: true,
            owner_id: admin.id,
        })
        .await?;

    println!("  created courses: {}, {}", rust_course.slug, sql_course.slug);

    // Coupons
    let launch = coupon_repo
        .create(CreateCouponRequest {
            code: "LAUNCH10".to_string(),
            kind: DiscountKind::Percent,
            value: 10,
            is_active: true,
            starts_at: None,
            expires_at: Some(Utc::now() + Duration::days(30)),
            usage_cap: Some(100),
        })
        .await?;
    coupon_repo.link_course(launch.id, rust_course.id).await?;
    coupon_repo.link_course(launch.id, sql_course.id).await?;

    let full_ride = coupon_repo
        .create(CreateCouponRequest {
            code: "SCHOLARSHIP".to_string(),
            kind: DiscountKind::Percent,
            value: 100,
            is_active: true,
            starts_at: None,
            expires_at: None,
            usage_cap: Some(5),
        })
        .await?;
    coupon_repo.link_course(full_ride.id, rust_course.id).await?;

    println!("  created coupons: LAUNCH10 (10%), SCHOLARSHIP (100%, cap 5)");
    println!("Done.");

    Ok(())
}
