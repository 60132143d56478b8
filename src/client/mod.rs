//! Typed REST client for the ride service.
//!
//! Every request carries the bearer token from the [`SessionStore`]. A 401 on
//! an authenticated request clears the store and surfaces
//! [`ClientError::AuthExpired`]. Request shapes the server would reject are
//! caught locally, as are concurrent duplicate mutations of one target.

pub mod error;
pub mod inflight;
pub mod poll;
pub mod session;

pub use error::ClientError;
pub use inflight::InFlight;
pub use poll::{spawn_refresh, RefreshHandle};
pub use session::{Session, SessionStore};

use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::api::validation::{validate_access_code, validate_create_ride, validate_update_ride};
use crate::config::RideConfig;
use crate::db::{
    AcceptRideRequest, AddMemberRequest, ApplyDriverRequest, CreateOrganizationRequest,
    CreateReviewRequest, CreateRideRequest, DriverProfile, JoinOrganizationRequest,
    JoinRideRequest, LeaveRideResponse, LoginResponse, OrganizationDetail, OrganizationDriver,
    OrganizationMemberWithUser, OrganizationSummary, Review, ReviewWithAuthor, RideListQuery,
    RideResponse, RideRider, RideSearchQuery, RideStatus, UpdateMemberRoleRequest,
    UpdateOrganizationRequest, UpdateProfileRequest, UpdateRideRequest, UserResponse,
};

pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    session: SessionStore,
    inflight: Arc<InFlight>,
    rides: RideConfig,
}

impl ApiClient {
    /// `rides` holds the ride limits the server enforces; local checks use
    /// them so that a request the server would accept is never refused here.
    pub fn new(
        base_url: impl Into<String>,
        session: SessionStore,
        rides: RideConfig,
    ) -> ClientResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session,
            inflight: Arc::new(InFlight::new()),
            rides,
        })
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    /// The logged-in user as of the last login
    pub fn current_user(&self) -> ClientResult<UserResponse> {
        self.session
            .load()?
            .map(|s| s.user)
            .ok_or(ClientError::NotLoggedIn)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api{}", self.base_url, path)
    }

    fn authed(&self, method: Method, path: &str) -> ClientResult<RequestBuilder> {
        let session = self.session.load()?.ok_or(ClientError::NotLoggedIn)?;
        Ok(self.http.request(method, self.url(path)).bearer_auth(session.token))
    }

    async fn send(&self, builder: RequestBuilder, authenticated: bool) -> ClientResult<Response> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.bytes().await.unwrap_or_default();
        if status == StatusCode::UNAUTHORIZED {
            if authenticated {
                warn!("Session rejected by server, clearing stored session");
                self.session.clear()?;
                return Err(ClientError::AuthExpired);
            }
            // No session was involved, e.g. a rejected identity token
            return Err(ClientError::NotAuthorized(error::message_of(&body)));
        }
        let err = ClientError::from_response(status.as_u16(), &body);
        debug!(status = status.as_u16(), "Request failed: {}", err);
        Err(err)
    }

    async fn call<T: DeserializeOwned>(&self, builder: RequestBuilder) -> ClientResult<T> {
        let response = self.send(builder, true).await?;
        Ok(response.json::<T>().await?)
    }

    async fn call_empty(&self, builder: RequestBuilder) -> ClientResult<()> {
        self.send(builder, true).await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Session
    // ------------------------------------------------------------------

    /// Exchange an identity token for a session, registering on first use
    pub async fn login_with_google(
        &self,
        id_token: &str,
        gender: Option<i64>,
        preferred_contact: Option<&str>,
    ) -> ClientResult<LoginResponse> {
        if id_token.trim().is_empty() {
            return Err(ClientError::validation("token", "Identity token is required"));
        }
        let body = serde_json::json!({
            "token": id_token.trim(),
            "gender": gender,
            "preferred_contact": preferred_contact,
        });
        let builder = self.http.post(self.url("/auth/google")).json(&body);
        let login: LoginResponse = self.send(builder, false).await?.json().await?;

        self.session.save(&Session {
            token: login.token.clone(),
            user: login.user.clone(),
        })?;
        Ok(login)
    }

    pub fn logout(&self) -> ClientResult<()> {
        self.session.clear()
    }

    pub async fn me(&self) -> ClientResult<UserResponse> {
        self.call(self.authed(Method::GET, "/auth/me")?).await
    }

    /// Renew the session token and store it
    pub async fn refresh_session(&self) -> ClientResult<LoginResponse> {
        let login: LoginResponse = self.call(self.authed(Method::POST, "/auth/refresh")?).await?;
        self.session.save(&Session {
            token: login.token.clone(),
            user: login.user.clone(),
        })?;
        Ok(login)
    }

    // ------------------------------------------------------------------
    // Users and drivers
    // ------------------------------------------------------------------

    pub async fn user(&self, user_id: &str) -> ClientResult<UserResponse> {
        self.call(self.authed(Method::GET, &format!("/users/{}", user_id))?)
            .await
    }

    pub async fn update_profile(&self, req: &UpdateProfileRequest) -> ClientResult<UserResponse> {
        self.call(self.authed(Method::PUT, "/users/me")?.json(req)).await
    }

    pub async fn user_rides(&self, user_id: &str) -> ClientResult<Vec<RideResponse>> {
        self.call(self.authed(Method::GET, &format!("/users/{}/rides", user_id))?)
            .await
    }

    /// Advisory only: the server re-checks on every mutation
    pub async fn has_active_ride(&self) -> ClientResult<bool> {
        let user = self.current_user()?;
        let rides = self.user_rides(&user.id).await?;
        Ok(rides.iter().any(|r| r.status == RideStatus::Active))
    }

    pub async fn apply_driver(&self, req: &ApplyDriverRequest) -> ClientResult<DriverProfile> {
        self.call(self.authed(Method::POST, "/drivers")?.json(req)).await
    }

    pub async fn my_driver_profile(&self) -> ClientResult<DriverProfile> {
        self.call(self.authed(Method::GET, "/drivers/me")?).await
    }

    pub async fn driver(&self, driver_id: &str) -> ClientResult<DriverProfile> {
        self.call(self.authed(Method::GET, &format!("/drivers/{}", driver_id))?)
            .await
    }

    pub async fn pending_drivers(&self) -> ClientResult<Vec<DriverProfile>> {
        self.call(self.authed(Method::GET, "/drivers/pending")?).await
    }

    pub async fn approve_driver(&self, driver_id: &str, approved: bool) -> ClientResult<DriverProfile> {
        let _guard = self.inflight.begin(format!("driver:{}", driver_id))?;
        let body = serde_json::json!({ "approved": approved });
        self.call(
            self.authed(Method::POST, &format!("/drivers/{}/approve", driver_id))?
                .json(&body),
        )
        .await
    }

    pub async fn driver_reviews(&self, driver_id: &str) -> ClientResult<Vec<ReviewWithAuthor>> {
        self.call(self.authed(Method::GET, &format!("/drivers/{}/reviews", driver_id))?)
            .await
    }

    // ------------------------------------------------------------------
    // Rides
    // ------------------------------------------------------------------

    pub async fn create_ride(&self, req: &CreateRideRequest) -> ClientResult<RideResponse> {
        validate_create_ride(req, &self.rides)?;
        let _guard = self.inflight.begin("ride:new")?;
        self.call(self.authed(Method::POST, "/rides")?.json(req)).await
    }

    pub async fn rider_requests(&self, query: &RideListQuery) -> ClientResult<Vec<RideResponse>> {
        self.call(self.authed(Method::GET, "/rides/rider-requests")?.query(query))
            .await
    }

    pub async fn driver_posts(&self, query: &RideListQuery) -> ClientResult<Vec<RideResponse>> {
        self.call(self.authed(Method::GET, "/rides/driver-posts")?.query(query))
            .await
    }

    pub async fn search_rides(&self, query: &RideSearchQuery) -> ClientResult<Vec<RideResponse>> {
        self.call(self.authed(Method::GET, "/rides/search")?.query(query))
            .await
    }

    pub async fn ride(&self, ride_id: &str) -> ClientResult<RideResponse> {
        self.call(self.authed(Method::GET, &format!("/rides/{}", ride_id))?)
            .await
    }

    pub async fn update_ride(&self, ride_id: &str, req: &UpdateRideRequest) -> ClientResult<RideResponse> {
        validate_update_ride(req, &self.rides)?;
        let _guard = self.inflight.begin(format!("ride:{}", ride_id))?;
        self.call(self.authed(Method::PUT, &format!("/rides/{}", ride_id))?.json(req))
            .await
    }

    pub async fn join_ride(&self, ride_id: &str, user_comment: Option<String>) -> ClientResult<RideResponse> {
        let _guard = self.inflight.begin(format!("ride:{}", ride_id))?;
        let body = JoinRideRequest { user_comment };
        self.call(
            self.authed(Method::POST, &format!("/rides/{}/join", ride_id))?
                .json(&body),
        )
        .await
    }

    pub async fn leave_ride(&self, ride_id: &str) -> ClientResult<LeaveRideResponse> {
        let _guard = self.inflight.begin(format!("ride:{}", ride_id))?;
        self.call(self.authed(Method::POST, &format!("/rides/{}/leave", ride_id))?)
            .await
    }

    pub async fn accept_ride(&self, ride_id: &str, driver_comment: Option<String>) -> ClientResult<RideResponse> {
        let _guard = self.inflight.begin(format!("ride:{}", ride_id))?;
        let body = AcceptRideRequest { driver_comment };
        self.call(
            self.authed(Method::POST, &format!("/rides/{}/join_driver", ride_id))?
                .json(&body),
        )
        .await
    }

    pub async fn complete_ride(&self, ride_id: &str) -> ClientResult<RideResponse> {
        let _guard = self.inflight.begin(format!("ride:{}", ride_id))?;
        self.call(self.authed(Method::POST, &format!("/rides/{}/complete", ride_id))?)
            .await
    }

    pub async fn cancel_ride(&self, ride_id: &str) -> ClientResult<RideResponse> {
        let _guard = self.inflight.begin(format!("ride:{}", ride_id))?;
        self.call(self.authed(Method::POST, &format!("/rides/{}/cancel", ride_id))?)
            .await
    }

    pub async fn ride_riders(&self, ride_id: &str) -> ClientResult<Vec<RideRider>> {
        self.call(self.authed(Method::GET, &format!("/rides/{}/riders", ride_id))?)
            .await
    }

    pub async fn review_ride(&self, ride_id: &str, req: &CreateReviewRequest) -> ClientResult<Review> {
        let _guard = self.inflight.begin(format!("review:{}", ride_id))?;
        self.call(
            self.authed(Method::POST, &format!("/rides/{}/reviews", ride_id))?
                .json(req),
        )
        .await
    }

    // ------------------------------------------------------------------
    // Organizations
    // ------------------------------------------------------------------

    pub async fn organizations(&self) -> ClientResult<Vec<OrganizationSummary>> {
        self.call(self.authed(Method::GET, "/organizations")?).await
    }

    pub async fn create_organization(&self, req: &CreateOrganizationRequest) -> ClientResult<OrganizationSummary> {
        if req.name.trim().is_empty() {
            return Err(ClientError::validation("name", "Organization name is required"));
        }
        let _guard = self.inflight.begin("organization:new")?;
        self.call(self.authed(Method::POST, "/organizations")?.json(req))
            .await
    }

    pub async fn join_organization(&self, access_code: &str) -> ClientResult<OrganizationSummary> {
        validate_access_code(access_code).map_err(|e| ClientError::validation("access_code", e))?;
        let _guard = self.inflight.begin("organization:join")?;
        let body = JoinOrganizationRequest {
            access_code: access_code.trim().to_string(),
        };
        self.call(self.authed(Method::POST, "/organizations/join")?.json(&body))
            .await
    }

    pub async fn organization(&self, org_id: &str) -> ClientResult<OrganizationDetail> {
        self.call(self.authed(Method::GET, &format!("/organizations/{}", org_id))?)
            .await
    }

    pub async fn update_organization(
        &self,
        org_id: &str,
        req: &UpdateOrganizationRequest,
    ) -> ClientResult<OrganizationSummary> {
        let _guard = self.inflight.begin(format!("organization:{}", org_id))?;
        self.call(
            self.authed(Method::PUT, &format!("/organizations/{}", org_id))?
                .json(req),
        )
        .await
    }

    pub async fn delete_organization(&self, org_id: &str) -> ClientResult<()> {
        let _guard = self.inflight.begin(format!("organization:{}", org_id))?;
        self.call_empty(self.authed(Method::DELETE, &format!("/organizations/{}", org_id))?)
            .await
    }

    pub async fn organization_members(&self, org_id: &str) -> ClientResult<Vec<OrganizationMemberWithUser>> {
        self.call(self.authed(Method::GET, &format!("/organizations/{}/members", org_id))?)
            .await
    }

    pub async fn organization_drivers(&self, org_id: &str) -> ClientResult<Vec<OrganizationDriver>> {
        self.call(self.authed(Method::GET, &format!("/organizations/{}/drivers", org_id))?)
            .await
    }

    pub async fn add_member(&self, org_id: &str, req: &AddMemberRequest) -> ClientResult<OrganizationMemberWithUser> {
        if req.user_id.trim().is_empty() {
            return Err(ClientError::validation("user_id", "User id is required"));
        }
        let _guard = self.inflight.begin(format!("member:{}:{}", org_id, req.user_id))?;
        self.call(
            self.authed(Method::POST, &format!("/organizations/{}/members", org_id))?
                .json(req),
        )
        .await
    }

    pub async fn leave_organization(&self, org_id: &str) -> ClientResult<()> {
        let _guard = self.inflight.begin(format!("organization:{}", org_id))?;
        self.call_empty(self.authed(Method::POST, &format!("/organizations/{}/leave", org_id))?)
            .await
    }

    pub async fn organization_rides(&self, org_id: &str, status: Option<RideStatus>) -> ClientResult<Vec<RideResponse>> {
        let mut builder = self.authed(Method::GET, &format!("/organizations/{}/rides", org_id))?;
        if let Some(status) = status {
            builder = builder.query(&[("status", status.to_string())]);
        }
        self.call(builder).await
    }

    pub async fn update_member_role(
        &self,
        org_id: &str,
        user_id: &str,
        req: &UpdateMemberRoleRequest,
    ) -> ClientResult<OrganizationMemberWithUser> {
        if req.is_admin.is_none() && req.is_driver.is_none() {
            return Err(ClientError::validation("role", "Nothing to change"));
        }
        let _guard = self.inflight.begin(format!("member:{}:{}", org_id, user_id))?;
        self.call(
            self.authed(
                Method::PUT,
                &format!("/organizations/{}/members/{}/role", org_id, user_id),
            )?
            .json(req),
        )
        .await
    }

    pub async fn remove_member(&self, org_id: &str, user_id: &str) -> ClientResult<()> {
        let _guard = self.inflight.begin(format!("member:{}:{}", org_id, user_id))?;
        self.call_empty(self.authed(
            Method::DELETE,
            &format!("/organizations/{}/members/{}", org_id, user_id),
        )?)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::create_router;
    use crate::testing::{context, driver, tomorrow, TestContext};
    use crate::AppState;
    use std::net::SocketAddr;

    async fn serve(state: Arc<AppState>) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = create_router(state);
        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });
        format!("http://{}", addr)
    }

    struct Harness {
        ctx: TestContext,
        base_url: String,
        dir: tempfile::TempDir,
    }

    impl Harness {
        async fn start() -> Self {
            let ctx = context().await;
            let base_url = serve(ctx.state.clone()).await;
            Self {
                ctx,
                base_url,
                dir: tempfile::tempdir().unwrap(),
            }
        }

        fn client(&self, name: &str) -> ApiClient {
            let store = SessionStore::new(self.dir.path().join(format!("{}.json", name)));
            ApiClient::new(&self.base_url, store, self.ctx.state.config.rides.clone()).unwrap()
        }

        async fn login(&self, name: &str) -> ApiClient {
            let client = self.client(name);
            client
                .login_with_google(
                    &format!("{}@uci.edu|{}", name.to_lowercase(), name),
                    Some(1),
                    Some("555-0199"),
                )
                .await
                .unwrap();
            client
        }
    }

    fn request() -> CreateRideRequest {
        CreateRideRequest {
            pickup_address: "Vista del Campo".to_string(),
            destination_address: "Newport Beach".to_string(),
            pickup_time: tomorrow(),
            price_option: "free".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_login_persists_session_and_logout_clears_it() {
        let h = Harness::start().await;
        let client = h.client("Peter");

        assert!(matches!(client.me().await, Err(ClientError::NotLoggedIn)));

        let login = client
            .login_with_google("peter@uci.edu|Peter", Some(0), Some("555-0100"))
            .await
            .unwrap();
        assert!(login.is_new_user);
        assert!(client.session().path().exists());
        assert_eq!(client.current_user().unwrap().email, "peter@uci.edu");
        assert_eq!(client.me().await.unwrap().name, "Peter");

        let refreshed = client.refresh_session().await.unwrap();
        assert!(!refreshed.is_new_user);

        client.logout().unwrap();
        assert!(matches!(client.current_user(), Err(ClientError::NotLoggedIn)));
    }

    #[tokio::test]
    async fn test_rejected_identity_is_not_a_session_expiry() {
        let h = Harness::start().await;
        let client = h.client("Mallory");
        match client.login_with_google("bad", None, None).await {
            Err(ClientError::NotAuthorized(message)) => {
                assert_eq!(message, "Identity token could not be verified")
            }
            other => panic!("unexpected {:?}", other.map(|l| l.token)),
        }
        assert!(matches!(
            client
                .login_with_google("bruin@ucla.edu", Some(0), Some("x"))
                .await,
            Err(ClientError::NotAuthorized(_))
        ));
        assert!(client.session().load().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rejected_token_clears_session() {
        let h = Harness::start().await;
        let client = h.login("Peter").await;
        let mut session = client.session().load().unwrap().unwrap();
        session.token = "forged".to_string();
        client.session().save(&session).unwrap();

        assert!(matches!(client.me().await, Err(ClientError::AuthExpired)));
        assert!(client.session().load().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_local_validation_skips_network() {
        // Nothing listens here; any request would fail as a network error
        let dir = tempfile::tempdir().unwrap();
        let client = ApiClient::new(
            "http://127.0.0.1:9",
            SessionStore::new(dir.path().join("s.json")),
            RideConfig::default(),
        )
        .unwrap();

        let missing = CreateRideRequest {
            pickup_address: String::new(),
            ..request()
        };
        match client.create_ride(&missing).await {
            Err(ClientError::Validation { field, .. }) => assert_eq!(field, "pickup_address"),
            other => panic!("unexpected {:?}", other.map(|r| r.id)),
        }
        assert!(matches!(
            client.join_organization("ABC").await,
            Err(ClientError::Validation { .. })
        ));
        assert!(matches!(
            client
                .update_member_role("o", "u", &UpdateMemberRoleRequest::default())
                .await,
            Err(ClientError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn test_local_checks_follow_configured_ride_limits() {
        let dir = tempfile::tempdir().unwrap();
        let roomy = RideConfig {
            max_capacity: 12,
            ..RideConfig::default()
        };
        let client = ApiClient::new(
            "http://127.0.0.1:9",
            SessionStore::new(dir.path().join("s.json")),
            roomy,
        )
        .unwrap();
        let van = CreateRideRequest {
            max_riders: Some(10),
            ..request()
        };

        // Passes local checks and only fails for want of a session
        assert!(matches!(client.create_ride(&van).await, Err(ClientError::NotLoggedIn)));
        assert!(matches!(
            client
                .update_ride(
                    "r",
                    &UpdateRideRequest {
                        max_riders: Some(13),
                        ..Default::default()
                    },
                )
                .await,
            Err(ClientError::Validation { .. })
        ));

        let strict = ApiClient::new(
            "http://127.0.0.1:9",
            SessionStore::new(dir.path().join("t.json")),
            RideConfig::default(),
        )
        .unwrap();
        assert!(matches!(
            strict.create_ride(&van).await,
            Err(ClientError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn test_server_errors_keep_their_message() {
        let h = Harness::start().await;
        let (dana, profile) = driver(&h.ctx.state, "Dana").await;
        let ride = crate::ride::service::create(
            &h.ctx.state,
            &dana,
            CreateRideRequest {
                driver_id: Some(profile.id.clone()),
                max_riders: Some(1),
                ..request()
            },
        )
        .await
        .unwrap();

        let ann = h.login("Ann").await;
        let ben = h.login("Ben").await;
        assert!(!ann.has_active_ride().await.unwrap());

        let joined = ann.join_ride(&ride.id, Some("at the bus stop".to_string())).await.unwrap();
        assert_eq!(joined.available_seats, 0);
        assert!(ann.has_active_ride().await.unwrap());

        match ben.join_ride(&ride.id, None).await {
            Err(ClientError::RideFull(message)) => assert_eq!(message, "This ride has no seats left"),
            other => panic!("unexpected {:?}", other.map(|r| r.id)),
        }
        assert!(matches!(
            ann.create_ride(&request()).await,
            Err(ClientError::AlreadyInActiveRide(_))
        ));
        assert!(matches!(
            ben.leave_ride(&ride.id).await,
            Err(ClientError::NotAMember(_))
        ));
        assert!(matches!(
            ann.update_ride(
                &ride.id,
                &UpdateRideRequest {
                    destination_address: Some("SNA".to_string()),
                    ..Default::default()
                },
            )
            .await,
            Err(ClientError::NotAuthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_duplicate_mutation_is_rejected_locally() {
        let h = Harness::start().await;
        let (dana, profile) = driver(&h.ctx.state, "Dana").await;
        let ride = crate::ride::service::create(
            &h.ctx.state,
            &dana,
            CreateRideRequest {
                driver_id: Some(profile.id.clone()),
                max_riders: Some(3),
                ..request()
            },
        )
        .await
        .unwrap();
        let ann = h.login("Ann").await;

        let (first, second) = tokio::join!(ann.join_ride(&ride.id, None), ann.join_ride(&ride.id, None));
        assert!(first.is_ok());
        assert!(matches!(second, Err(ClientError::Validation { .. })));
        assert_eq!(ann.ride_riders(&ride.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_organization_flow() {
        let h = Harness::start().await;
        let owner = h.login("Olivia").await;
        let max = h.login("Max").await;

        let org = owner
            .create_organization(&CreateOrganizationRequest {
                name: "Anteater Hikers".to_string(),
                description: Some("Weekend trail rides".to_string()),
            })
            .await
            .unwrap();
        let code = org.access_code.clone().unwrap();

        assert!(matches!(
            max.join_organization("ZZZZZZ").await,
            Err(ClientError::InvalidAccessCode(_))
        ));
        max.join_organization(&code.to_lowercase()).await.unwrap();
        assert!(matches!(
            max.join_organization(&code).await,
            Err(ClientError::AlreadyMember(_))
        ));

        let max_id = max.current_user().unwrap().id;
        let owner_id = owner.current_user().unwrap().id;
        owner
            .update_member_role(
                &org.id,
                &max_id,
                &UpdateMemberRoleRequest {
                    is_admin: Some(true),
                    is_driver: None,
                },
            )
            .await
            .unwrap();
        assert!(matches!(
            max.update_member_role(
                &org.id,
                &owner_id,
                &UpdateMemberRoleRequest {
                    is_admin: Some(false),
                    is_driver: None,
                },
            )
            .await,
            Err(ClientError::CannotModifyOwner(_))
        ));

        let members = max.organization_members(&org.id).await.unwrap();
        assert_eq!(members.len(), 2);
        assert!(max.organization_rides(&org.id, Some(RideStatus::Active)).await.unwrap().is_empty());

        let (dana, profile) = driver(&h.ctx.state, "Dana").await;
        let added = max
            .add_member(
                &org.id,
                &AddMemberRequest {
                    user_id: dana.id.clone(),
                    is_admin: None,
                    is_driver: Some(true),
                },
            )
            .await
            .unwrap();
        assert!(added.is_driver);
        let drivers = owner.organization_drivers(&org.id).await.unwrap();
        assert_eq!(drivers.len(), 1);
        assert_eq!(drivers[0].driver_id, profile.id);

        owner.remove_member(&org.id, &max_id).await.unwrap();
        assert!(matches!(
            max.organization(&org.id).await,
            Err(ClientError::NotAuthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_refresh_task_tracks_membership() {
        let h = Harness::start().await;
        let owner = h.login("Olivia").await;
        let org = owner
            .create_organization(&CreateOrganizationRequest {
                name: "Carpool Crew".to_string(),
                description: None,
            })
            .await
            .unwrap();

        let client = owner.clone();
        let org_id = org.id.clone();
        let handle = spawn_refresh(Duration::from_millis(50), move || {
            let client = client.clone();
            let org_id = org_id.clone();
            async move { client.organization_members(&org_id).await }
        });

        let mut rx = handle.subscribe();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().as_ref().map(|m| m.len()), Some(1));

        let max = h.login("Max").await;
        max.join_organization(org.access_code.as_deref().unwrap()).await.unwrap();

        let seen_two = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                rx.changed().await.unwrap();
                if rx.borrow().as_ref().map(|m| m.len()) == Some(2) {
                    break;
                }
            }
        })
        .await;
        assert!(seen_two.is_ok());
        handle.stop().await;
    }
}
