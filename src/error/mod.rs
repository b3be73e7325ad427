//! Crate-wide error type and the §7 error-category taxonomy.

mod private
{
  use error_tools::dependency::thiserror;

  /// Errors produced anywhere in the decision/dispatch engine.
  #[ derive( Debug, thiserror::Error, Clone, PartialEq ) ]
  pub enum Error
  {
    /// I/O error occurred while touching the append-only stores or the
    /// configuration document.
    #[ error( "IO error : {0}" ) ]
    Io( String ),

    /// The remote call timed out.
    #[ error( "Timeout error : {0}" ) ]
    Timeout( String ),

    /// A network-level failure (connection refused, DNS, reset, ...).
    #[ error( "Network error : {0}" ) ]
    Network( String ),

    /// The provider responded with a 5xx-equivalent status.
    #[ error( "Provider server error : {0}" ) ]
    ProviderServerError( String ),

    /// The provider rejected the request for rate-limit reasons, or the
    /// Rate-Limit Tracker pre-check refused it.
    #[ error( "Rate limited : {0}" ) ]
    RateLimited( String ),

    /// The Health Tracker currently reports the model unavailable ; a
    /// transient condition that may clear once its backoff elapses.
    #[ error( "Model unavailable : {0}" ) ]
    ModelUnavailable( String ),

    /// Credential was rejected by the provider or the credential store has
    /// no entry for the requested provider.
    #[ error( "Authentication error : {0}" ) ]
    Authentication( String ),

    /// The request itself is malformed (caller error, never retried).
    #[ error( "Validation error : {0}" ) ]
    Validation( String ),

    /// Invalid configuration, unknown model id, or missing adapter for a
    /// provider.
    #[ error( "Configuration error : {0}" ) ]
    Configuration( String ),

    /// Serialization of a record or configuration document failed.
    #[ error( "Serialization error : {0}" ) ]
    Serialization( String ),

    /// Every model a request was tried against failed; carries the full
    /// attempt record required by spec §7.
    #[ error(
      "Failover exhausted for task {task_id} : original={original}, attempted={attempted:?}"
    ) ]
    FailoverExhausted
    {
      /// The model the request was originally routed to.
      original : String,
      /// Every model id attempted, in order.
      attempted : Vec< String >,
      /// Task id the exhausted request belongs to.
      task_id : String,
      /// Failure reason recorded per attempted model.
      reason_per_model : std::collections::HashMap< String, String >,
    },

    /// No model satisfied the request at all, including the fallback path.
    #[ error( "No models available for task {task_id} : {message}" ) ]
    NoModelsAvailable
    {
      /// Task id the request belongs to.
      task_id : String,
      /// Human-readable explanation.
      message : String,
    },

    /// The request was cancelled before it completed.
    #[ error( "Cancelled : {0}" ) ]
    Cancelled( String ),

    /// Catch-all for conditions that don't fit another variant.
    #[ error( "Unknown error : {0}" ) ]
    Unknown( String ),
  }

  impl From< std::io::Error > for Error
  {
    #[ inline ]
    fn from( err : std::io::Error ) -> Self
    {
      Error::Io( err.to_string() )
    }
  }

  impl From< serde_json::Error > for Error
  {
    #[ inline ]
    fn from( err : serde_json::Error ) -> Self
    {
      Error::Serialization( err.to_string() )
    }
  }

  /// The five error categories from spec §7, governing retry/failover policy.
  #[ derive( Debug, Clone, Copy, PartialEq, Eq, Hash ) ]
  pub enum ErrorCategory
  {
    /// Network timeout, connection failure, provider 5xx, probe timeout,
    /// model temporarily unavailable.
    Transient,
    /// Explicit rate-limit signal or tracker-detected threshold breach.
    RateLimit,
    /// Credential rejected.
    Authentication,
    /// Malformed request.
    Validation,
    /// Invalid config, unknown model id, missing adapter.
    Configuration,
  }

  impl ErrorCategory
  {
    /// Transient and rate-limit errors are retried by the Dispatcher and,
    /// once its budget is exhausted, by the Failover Coordinator.
    #[ inline ]
    #[ must_use ]
    pub fn is_retryable( self ) -> bool
    {
      matches!( self, ErrorCategory::Transient | ErrorCategory::RateLimit )
    }
  }

  /// Classify an [`Error`] into its §7 category.
  #[ inline ]
  #[ must_use ]
  pub fn categorize( error : &Error ) -> ErrorCategory
  {
    match error
    {
      Error::Timeout( _ ) | Error::Network( _ ) | Error::ProviderServerError( _ ) | Error::ModelUnavailable( _ ) =>
        ErrorCategory::Transient,
      Error::RateLimited( _ ) => ErrorCategory::RateLimit,
      Error::Authentication( _ ) => ErrorCategory::Authentication,
      Error::Validation( _ ) => ErrorCategory::Validation,
      Error::Configuration( _ ) => ErrorCategory::Configuration,
      // Everything else (failover/no-models/cancelled/io/serialization/unknown)
      // is terminal by construction - it is never fed back into the retry loop.
      _ => ErrorCategory::Configuration,
    }
  }
}

pub use private::{ Error, ErrorCategory, categorize };

#[ cfg( test ) ]
mod tests
{
  use super::*;

  #[ test ]
  fn network_and_timeout_errors_categorize_as_transient()
  {
    assert_eq!( categorize( &Error::Timeout( "slow".to_string() ) ), ErrorCategory::Transient );
    assert_eq!( categorize( &Error::Network( "reset".to_string() ) ), ErrorCategory::Transient );
    assert_eq!( categorize( &Error::ProviderServerError( "500".to_string() ) ), ErrorCategory::Transient );
    assert_eq!( categorize( &Error::ModelUnavailable( "backoff".to_string() ) ), ErrorCategory::Transient );
  }

  #[ test ]
  fn rate_limited_categorizes_as_rate_limit()
  {
    assert_eq!( categorize( &Error::RateLimited( "over quota".to_string() ) ), ErrorCategory::RateLimit );
  }

  #[ test ]
  fn transient_and_rate_limit_are_retryable()
  {
    assert!( ErrorCategory::Transient.is_retryable() );
    assert!( ErrorCategory::RateLimit.is_retryable() );
  }

  #[ test ]
  fn authentication_validation_and_configuration_are_not_retryable()
  {
    assert!( !ErrorCategory::Authentication.is_retryable() );
    assert!( !ErrorCategory::Validation.is_retryable() );
    assert!( !ErrorCategory::Configuration.is_retryable() );
  }

  #[ test ]
  fn terminal_variants_categorize_as_non_retryable_configuration()
  {
    let terminal = Error::NoModelsAvailable { task_id : "t-1".to_string(), message : "none".to_string() };
    assert_eq!( categorize( &terminal ), ErrorCategory::Configuration );
    assert!( !categorize( &terminal ).is_retryable() );
  }

  #[ test ]
  fn io_error_converts_into_io_variant()
  {
    let io_err = std::io::Error::new( std::io::ErrorKind::NotFound, "missing" );
    let err : Error = io_err.into();
    assert!( matches!( err, Error::Io( _ ) ) );
  }
}
