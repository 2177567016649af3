/**
 * Authgate - Library Root Module
 *
 * Authgate is an authenticating reverse proxy: it terminates browser
 * sessions in front of one or more HTTP upstreams, establishes identity
 * through an external OAuth2 provider (or htpasswd credentials, or bearer
 * tokens) and forwards authenticated requests with identity headers
 * attached. Sessions live entirely in a signed, optionally encrypted
 * cookie; the proxy keeps no session table.
 *
 * # Modules
 *
 * ## [`security`](mod@security)
 * Core crypto primitives: the sealed session cookie codec, the optional
 * AES-GCM session cipher, CSRF nonce generation and the htpasswd store.
 *
 * ## [`session`](mod@session)
 * The `SessionState` principal and its cookie serialization.
 *
 * ## [`providers`](mod@providers)
 * The identity-provider capability trait and the generic OIDC-style
 * implementation (code redemption, JWKS-verified bearer tokens, refresh).
 *
 * ## [`auth`](mod@auth)
 * The request authenticator: cookie/bearer/basic decision tree, session
 * refresh and revalidation, identity-header enrichment.
 *
 * ## [`upstream`](mod@upstream)
 * Path-prefix upstream registry and the dispatch handler (reverse proxy,
 * static files, WebSocket relay, optional request signing).
 *
 * ## [`handlers`](mod@handlers)
 * The OAuth2 flow endpoints under the proxy prefix plus `/ping` and
 * `/robots.txt`.
 *
 * ## [`routes`](mod@routes)
 * Router assembly, whitelist classification and the metrics middleware.
 *
 * # Configuration
 *
 * Everything is environment-driven; see [`config`](mod@config) for the
 * variable set. `COOKIE_SECRET`, `UPSTREAMS`, `EMAIL_DOMAINS`, `CLIENT_ID`
 * and `CLIENT_SECRET` are required.
 */
// Core application modules
pub mod auth; // Request authentication decision tree
pub mod config; // Environment-driven proxy configuration
pub mod handlers; // OAuth2 flow and system endpoints
pub mod metrics; // Injected request metrics registry
pub mod providers; // Identity provider contract and OIDC implementation
pub mod routes; // Route definitions
pub mod security; // Cookie sealing, ciphers, htpasswd
pub mod session; // Session state and serialization
pub mod state; // Shared application state
pub mod upstream; // Upstream registry and dispatch
pub mod validation; // Email authorization validator
