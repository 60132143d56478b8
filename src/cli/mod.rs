//! Command-line interface for ZotRide.
//!
//! `serve` (or no subcommand) runs the ride service; every other subcommand
//! talks to a running server through [`ApiClient`]:
//! - `login` / `whoami` / `logout` - manage the stored session
//! - `rides ...` - browse, create and act on rides
//! - `orgs ...` - organizations, membership and roles
//! - `driver ...` - driver application and status

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::client::{spawn_refresh, ApiClient, ClientError, SessionStore};
use crate::config::Config;
use crate::db::{
    AddMemberRequest, ApplyDriverRequest, CreateOrganizationRequest, CreateReviewRequest,
    CreateRideRequest, OrganizationMemberWithUser, RideListQuery, RideResponse, RideSearchQuery,
    UpdateMemberRoleRequest, UpdateRideRequest,
};

/// CLI arguments structure
#[derive(Parser, Debug)]
#[command(name = "zotride")]
#[command(author, version, about = "Campus ride sharing: rides, drivers and club networks", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "zotride.toml")]
    pub config: PathBuf,

    /// Override log level
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// API URL to connect to
    #[arg(long, env = "ZOTRIDE_API_URL", default_value = "http://localhost:5001")]
    pub api_url: String,

    /// Where the login session is stored
    #[arg(long, env = "ZOTRIDE_SESSION_FILE", default_value = ".zotride/session.json")]
    pub session_file: PathBuf,

    /// Subcommand to run (if none, starts the server)
    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// True when this invocation runs the server rather than a client command
    pub fn is_serve(&self) -> bool {
        matches!(self.command, None | Some(Commands::Serve))
    }
}

/// Available CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the ride service
    Serve,

    /// Log in with a Google ID token (registers on first use)
    Login {
        #[arg(long)]
        google_token: String,
        /// 0 male, 1 female, 2 other; required to register
        #[arg(long)]
        gender: Option<i64>,
        /// How riders and drivers should reach you; required to register
        #[arg(long)]
        contact: Option<String>,
    },

    /// Show the logged-in user
    Whoami,

    /// Forget the stored session
    Logout,

    /// Ride commands
    #[command(subcommand)]
    Rides(RidesCommands),

    /// Organization commands
    #[command(subcommand)]
    Orgs(OrgsCommands),

    /// Driver commands
    #[command(subcommand)]
    Driver(DriverCommands),
}

#[derive(Subcommand, Debug)]
pub enum RidesCommands {
    /// Open rider requests waiting for a driver
    Requests {
        /// Only this organization's rides
        #[arg(long)]
        org: Option<String>,
        #[arg(long)]
        limit: Option<i64>,
    },
    /// Rides offered by drivers
    Posts {
        #[arg(long)]
        org: Option<String>,
        #[arg(long)]
        limit: Option<i64>,
    },
    /// Search open rides
    Search {
        #[arg(long)]
        pickup: Option<String>,
        #[arg(long)]
        destination: Option<String>,
        /// YYYY-MM-DD
        #[arg(long)]
        date: Option<String>,
        #[arg(long)]
        min_seats: Option<i64>,
    },
    /// Show a ride
    Show { id: String },
    /// Request a ride, or post one with --as-driver
    Create {
        #[arg(long)]
        pickup: String,
        #[arg(long)]
        destination: String,
        /// RFC 3339 pickup time, e.g. 2030-05-01T08:30:00-07:00
        #[arg(long)]
        time: String,
        /// free, gas or gas_with_fee
        #[arg(long, default_value = "free")]
        price: String,
        #[arg(long)]
        seats: Option<i64>,
        /// Post as your approved driver profile
        #[arg(long)]
        as_driver: bool,
        #[arg(long)]
        org: Option<String>,
        #[arg(long)]
        comment: Option<String>,
    },
    /// Edit one of your active rides; only the given fields change
    Edit {
        id: String,
        #[arg(long)]
        pickup: Option<String>,
        #[arg(long)]
        destination: Option<String>,
        #[arg(long)]
        time: Option<String>,
        #[arg(long)]
        price: Option<String>,
        #[arg(long)]
        seats: Option<i64>,
        /// Driver comment; an empty string clears it
        #[arg(long)]
        comment: Option<String>,
    },
    /// Join a ride as a rider
    Join {
        id: String,
        #[arg(long)]
        comment: Option<String>,
    },
    /// Leave a ride
    Leave { id: String },
    /// Become the driver of a rider request
    Accept {
        id: String,
        #[arg(long)]
        comment: Option<String>,
    },
    /// Mark your ride as completed
    Complete { id: String },
    /// Cancel a ride
    Cancel { id: String },
    /// List the riders of a ride
    Riders { id: String },
    /// Your rides
    Mine,
    /// Review the driver of a completed ride
    Review {
        id: String,
        #[arg(long)]
        stars: f64,
        #[arg(long, default_value = "")]
        comment: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum OrgsCommands {
    /// Organizations you belong to
    List,
    /// Create an organization; you become its owner
    Create {
        name: String,
        #[arg(long)]
        description: Option<String>,
    },
    /// Join with an access code
    Join { code: String },
    /// List members
    Members { id: String },
    /// Members who can drive, with their vehicles
    Drivers { id: String },
    /// Add an existing user directly
    AddMember {
        org: String,
        user: String,
        #[arg(long)]
        admin: bool,
        #[arg(long)]
        driver: bool,
    },
    /// Keep the member list on screen, refreshing until Ctrl+C
    Watch {
        id: String,
        /// Refresh interval in seconds
        #[arg(long, default_value = "5")]
        interval: u64,
    },
    /// Grant or revoke admin/driver capabilities
    SetRole {
        org: String,
        user: String,
        #[arg(long)]
        admin: Option<bool>,
        #[arg(long)]
        driver: Option<bool>,
    },
    /// Remove a member
    Remove { org: String, user: String },
}

#[derive(Subcommand, Debug)]
pub enum DriverCommands {
    /// Apply to drive
    Apply {
        #[arg(long)]
        vehicle: String,
        #[arg(long)]
        plate: String,
        /// Reference to the uploaded license image
        #[arg(long)]
        license_image: String,
    },
    /// Show your driver application
    Status,
}

/// The client checks ride limits locally, so it reads them from the same
/// configuration file the server uses
fn create_client(cli: &Cli) -> Result<ApiClient> {
    let config = Config::load(&cli.config)?;
    ApiClient::new(&cli.api_url, SessionStore::new(&cli.session_file), config.rides)
        .context("Failed to create HTTP client")
}

/// Run a client subcommand
pub async fn run_command(cli: &Cli) -> Result<()> {
    let client = create_client(cli)?;
    let result = match &cli.command {
        None | Some(Commands::Serve) => Ok(()),
        Some(Commands::Login {
            google_token,
            gender,
            contact,
        }) => cmd_login(&client, google_token, *gender, contact.as_deref()).await,
        Some(Commands::Whoami) => cmd_whoami(&client).await,
        Some(Commands::Logout) => {
            client.logout()?;
            println!("Logged out.");
            Ok(())
        }
        Some(Commands::Rides(cmd)) => cmd_rides(&client, cmd).await,
        Some(Commands::Orgs(cmd)) => cmd_orgs(&client, cmd).await,
        Some(Commands::Driver(cmd)) => cmd_driver(&client, cmd).await,
    };

    match result {
        Err(e) if e.downcast_ref::<ClientError>().is_some_and(ClientError::needs_login) => {
            Err(e.context("Log in with `zotride login --google-token <token>`"))
        }
        other => other,
    }
}

async fn cmd_login(
    client: &ApiClient,
    token: &str,
    gender: Option<i64>,
    contact: Option<&str>,
) -> Result<()> {
    let login = client.login_with_google(token, gender, contact).await?;
    if login.is_new_user {
        println!("Welcome, {}! Your account has been created.", login.user.name);
    } else {
        println!("Logged in as {} <{}>", login.user.name, login.user.email);
    }
    Ok(())
}

async fn cmd_whoami(client: &ApiClient) -> Result<()> {
    let user = client.me().await?;
    println!();
    println!("Name:       {}", user.name);
    println!("Email:      {}", user.email);
    println!("Contact:    {}", user.preferred_contact);
    println!("Driver:     {:?}", user.driver_status);
    if user.is_system_admin {
        println!("Role:       system admin");
    }
    let active = client.has_active_ride().await?;
    println!("Active ride: {}", if active { "yes" } else { "no" });
    println!();
    Ok(())
}

async fn cmd_rides(client: &ApiClient, cmd: &RidesCommands) -> Result<()> {
    match cmd {
        RidesCommands::Requests { org, limit } => {
            let query = RideListQuery {
                organization_id: org.clone(),
                limit: *limit,
                offset: None,
            };
            print_rides(&client.rider_requests(&query).await?);
        }
        RidesCommands::Posts { org, limit } => {
            let query = RideListQuery {
                organization_id: org.clone(),
                limit: *limit,
                offset: None,
            };
            print_rides(&client.driver_posts(&query).await?);
        }
        RidesCommands::Search {
            pickup,
            destination,
            date,
            min_seats,
        } => {
            let query = RideSearchQuery {
                pickup_address: pickup.clone(),
                destination_address: destination.clone(),
                date: date.clone(),
                min_seats: *min_seats,
                organization_id: None,
            };
            print_rides(&client.search_rides(&query).await?);
        }
        RidesCommands::Show { id } => print_ride(&client.ride(id).await?),
        RidesCommands::Create {
            pickup,
            destination,
            time,
            price,
            seats,
            as_driver,
            org,
            comment,
        } => {
            let driver_id = if *as_driver {
                Some(client.my_driver_profile().await?.id)
            } else {
                None
            };
            let req = CreateRideRequest {
                pickup_address: pickup.clone(),
                destination_address: destination.clone(),
                pickup_time: time.clone(),
                price_option: price.clone(),
                max_riders: *seats,
                organization_id: org.clone(),
                driver_comment: comment.clone().filter(|_| *as_driver),
                rider_comment: comment.clone().filter(|_| !*as_driver),
                driver_id,
            };
            let ride = client.create_ride(&req).await?;
            println!("Ride created.");
            print_ride(&ride);
        }
        RidesCommands::Edit {
            id,
            pickup,
            destination,
            time,
            price,
            seats,
            comment,
        } => {
            let req = UpdateRideRequest {
                pickup_address: pickup.clone(),
                destination_address: destination.clone(),
                pickup_time: time.clone(),
                price_option: price.clone(),
                max_riders: *seats,
                driver_comment: comment.clone(),
            };
            let ride = client.update_ride(id, &req).await?;
            println!("Ride updated.");
            print_ride(&ride);
        }
        RidesCommands::Join { id, comment } => {
            client.join_ride(id, comment.clone()).await?;
            println!("Joined the ride.");
            print_ride(&client.ride(id).await?);
        }
        RidesCommands::Leave { id } => {
            let left = client.leave_ride(id).await?;
            println!("{}", left.message);
            print_ride(&client.ride(id).await?);
        }
        RidesCommands::Accept { id, comment } => {
            client.accept_ride(id, comment.clone()).await?;
            println!("You are now driving this ride.");
            print_ride(&client.ride(id).await?);
        }
        RidesCommands::Complete { id } => {
            client.complete_ride(id).await?;
            println!("Ride completed.");
            print_ride(&client.ride(id).await?);
        }
        RidesCommands::Cancel { id } => {
            client.cancel_ride(id).await?;
            println!("Ride cancelled.");
            print_ride(&client.ride(id).await?);
        }
        RidesCommands::Riders { id } => {
            let riders = client.ride_riders(id).await?;
            if riders.is_empty() {
                println!("No riders yet.");
                return Ok(());
            }
            println!();
            println!("{:<24}  {:<30}  {:<30}", "NAME", "EMAIL", "COMMENT");
            println!("{}", "-".repeat(88));
            for rider in riders {
                println!(
                    "{:<24}  {:<30}  {:<30}",
                    truncate(&rider.name, 24),
                    truncate(&rider.email, 30),
                    truncate(rider.comment.as_deref().unwrap_or("-"), 30)
                );
            }
            println!();
        }
        RidesCommands::Mine => {
            let user = client.current_user()?;
            print_rides(&client.user_rides(&user.id).await?);
        }
        RidesCommands::Review { id, stars, comment } => {
            let review = client
                .review_ride(
                    id,
                    &CreateReviewRequest {
                        stars: *stars,
                        comment: comment.clone(),
                    },
                )
                .await?;
            println!("Thanks! You rated this ride {:.1} stars.", review.stars);
        }
    }
    Ok(())
}

async fn cmd_orgs(client: &ApiClient, cmd: &OrgsCommands) -> Result<()> {
    match cmd {
        OrgsCommands::List => {
            let orgs = client.organizations().await?;
            if orgs.is_empty() {
                println!("You are not in any organization.");
                return Ok(());
            }
            println!();
            println!("{:<36}  {:<24}  {:>7}  {:<8}  {:<10}", "ID", "NAME", "MEMBERS", "CODE", "ROLE");
            println!("{}", "-".repeat(93));
            for org in orgs {
                let role = if org.is_owner {
                    "owner"
                } else if org.is_admin {
                    "admin"
                } else if org.is_driver {
                    "driver"
                } else {
                    "member"
                };
                println!(
                    "{:<36}  {:<24}  {:>7}  {:<8}  {:<10}",
                    org.id,
                    truncate(&org.name, 24),
                    org.member_count,
                    org.access_code.as_deref().unwrap_or("-"),
                    role
                );
            }
            println!();
        }
        OrgsCommands::Create { name, description } => {
            let org = client
                .create_organization(&CreateOrganizationRequest {
                    name: name.clone(),
                    description: description.clone(),
                })
                .await?;
            println!("Created {} ({})", org.name, org.id);
            if let Some(code) = org.access_code {
                println!("Access code: {}", code);
            }
        }
        OrgsCommands::Join { code } => {
            let org = client.join_organization(code).await?;
            println!("Joined {}.", org.name);
        }
        OrgsCommands::Members { id } => print_members(&client.organization_members(id).await?),
        OrgsCommands::Drivers { id } => {
            let drivers = client.organization_drivers(id).await?;
            if drivers.is_empty() {
                println!("No drivers in this organization yet.");
                return Ok(());
            }
            println!();
            println!("{:<24}  {:<30}  {:<24}  {:<10}  {:>6}", "NAME", "EMAIL", "VEHICLE", "PLATE", "RATING");
            println!("{}", "-".repeat(102));
            for d in drivers {
                let rating = d
                    .average_rating
                    .map(|r| format!("{:.1}", r))
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:<24}  {:<30}  {:<24}  {:<10}  {:>6}",
                    truncate(&d.name, 24),
                    truncate(&d.email, 30),
                    truncate(&d.vehicle_description, 24),
                    d.license_plate,
                    rating
                );
            }
            println!();
        }
        OrgsCommands::AddMember {
            org,
            user,
            admin,
            driver,
        } => {
            let member = client
                .add_member(
                    org,
                    &AddMemberRequest {
                        user_id: user.clone(),
                        is_admin: admin.then_some(true),
                        is_driver: driver.then_some(true),
                    },
                )
                .await?;
            println!("Added {} <{}>.", member.user_name, member.user_email);
        }
        OrgsCommands::Watch { id, interval } => {
            let watched = client.clone();
            let org_id = id.clone();
            let handle = spawn_refresh(Duration::from_secs((*interval).max(1)), move || {
                let client = watched.clone();
                let org_id = org_id.clone();
                async move { client.organization_members(&org_id).await }
            });
            let mut rx = handle.subscribe();
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    changed = rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        if let Some(members) = rx.borrow_and_update().as_ref() {
                            print_members(members);
                        }
                    }
                }
            }
            handle.stop().await;
        }
        OrgsCommands::SetRole {
            org,
            user,
            admin,
            driver,
        } => {
            let member = client
                .update_member_role(
                    org,
                    user,
                    &UpdateMemberRoleRequest {
                        is_admin: *admin,
                        is_driver: *driver,
                    },
                )
                .await?;
            println!(
                "{}: admin={} driver={}",
                member.user_name, member.is_admin, member.is_driver
            );
        }
        OrgsCommands::Remove { org, user } => {
            client.remove_member(org, user).await?;
            println!("Member removed.");
        }
    }
    Ok(())
}

async fn cmd_driver(client: &ApiClient, cmd: &DriverCommands) -> Result<()> {
    match cmd {
        DriverCommands::Apply {
            vehicle,
            plate,
            license_image,
        } => {
            let profile = client
                .apply_driver(&ApplyDriverRequest {
                    vehicle_description: vehicle.clone(),
                    license_plate: plate.clone(),
                    license_image: license_image.clone(),
                })
                .await?;
            println!("Application submitted ({}). An administrator will review it.", profile.id);
        }
        DriverCommands::Status => {
            let profile = client.my_driver_profile().await?;
            println!();
            println!("Driver ID:  {}", profile.id);
            println!("Vehicle:    {}", profile.vehicle_description);
            println!("Plate:      {}", profile.license_plate);
            println!(
                "Status:     {}",
                if profile.is_approved { "approved" } else { "pending approval" }
            );
            match profile.average_rating {
                Some(avg) => println!("Rating:     {:.2} ({} reviews)", avg, profile.review_count),
                None => println!("Rating:     no reviews yet"),
            }
            println!();
        }
    }
    Ok(())
}

fn print_ride(ride: &RideResponse) {
    println!();
    println!("=== Ride {} ===", ride.id);
    println!("From:       {}", ride.pickup_address);
    println!("To:         {}", ride.destination_address);
    println!("Pickup:     {}", ride.pickup_time);
    println!("Status:     {} ({})", ride.status, ride.phase);
    println!(
        "Seats:      {} of {} free",
        ride.available_seats, ride.max_riders
    );
    println!("Price:      {}", ride.price_option);
    if let Some(driver) = &ride.driver_user_id {
        println!("Driver:     {}", driver);
    }
    if let Some(comment) = &ride.driver_comment {
        println!("Note:       {}", comment);
    }
    println!();
}

fn print_rides(rides: &[RideResponse]) {
    if rides.is_empty() {
        println!("No rides found.");
        return;
    }

    println!();
    println!(
        "{:<36}  {:<20}  {:<20}  {:<20}  {:>5}  {:<12}",
        "ID", "FROM", "TO", "PICKUP", "SEATS", "PHASE"
    );
    println!("{}", "-".repeat(124));
    for ride in rides {
        println!(
            "{:<36}  {:<20}  {:<20}  {:<20}  {:>5}  {:<12}",
            ride.id,
            truncate(&ride.pickup_address, 20),
            truncate(&ride.destination_address, 20),
            truncate(&ride.pickup_time, 20),
            ride.available_seats,
            ride.phase.to_string()
        );
    }
    println!();
}

fn print_members(members: &[OrganizationMemberWithUser]) {
    println!();
    println!("{:<36}  {:<24}  {:<30}  {:<12}", "USER ID", "NAME", "EMAIL", "ROLE");
    println!("{}", "-".repeat(108));
    for m in members {
        let mut roles = Vec::new();
        if m.is_owner {
            roles.push("owner");
        }
        if m.is_admin {
            roles.push("admin");
        }
        if m.is_driver {
            roles.push("driver");
        }
        let role = if roles.is_empty() {
            "member".to_string()
        } else {
            roles.join(",")
        };
        println!(
            "{:<36}  {:<24}  {:<30}  {:<12}",
            m.user_id,
            truncate(&m.user_name, 24),
            truncate(&m.user_email, 30),
            role
        );
    }
    println!();
}

/// Truncate a string to max length with ellipsis
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
