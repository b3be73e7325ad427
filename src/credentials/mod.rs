//! Credential Store : round-robin environment-variable API keys per
//! provider (spec §4.10, grounded on
//! `api_key_manager.py`'s `<PROVIDER>_API_KEY`, `_2`, `_3`, ... scan).

mod private
{
  use std::collections::HashMap;
  use std::sync::atomic::{ AtomicUsize, Ordering };
  use secrecy::{ ExposeSecret, SecretString };

  use crate::error::Error;

  /// Source of per-provider API keys, abstracted so tests and embedders
  /// can substitute a different backing store.
  pub trait CredentialStore : Send + Sync + std::fmt::Debug
  {
    /// Return the next key to use for `provider`, rotating round-robin
    /// across every key registered for it.
    fn next_key( &self, provider : &str ) -> Result< SecretString, Error >;

    /// Number of keys currently registered for `provider`.
    fn key_count( &self, provider : &str ) -> usize;
  }

  struct ProviderKeys
  {
    keys : Vec< SecretString >,
    cursor : AtomicUsize,
  }

  impl std::fmt::Debug for ProviderKeys
  {
    fn fmt( &self, f : &mut std::fmt::Formatter< '_ > ) -> std::fmt::Result
    {
      f.debug_struct( "ProviderKeys" ).field( "key_count", &self.keys.len() ).finish()
    }
  }

  /// Scans `<PROVIDER>_API_KEY`, `<PROVIDER>_API_KEY_2`, `<PROVIDER>_API_KEY_3`,
  /// ... at construction time, stopping at the first gap, then serves keys
  /// round-robin per provider.
  #[ derive( Debug ) ]
  pub struct EnvCredentialStore
  {
    by_provider : HashMap< String, ProviderKeys >,
  }

  impl EnvCredentialStore
  {
    /// Scan the process environment for every provider named in `providers`.
    #[ inline ]
    #[ must_use ]
    pub fn scan( providers : &[ &str ] ) -> Self
    {
      let mut by_provider = HashMap::new();
      for provider in providers
      {
        let upper = provider.to_uppercase();
        let mut keys = Vec::new();

        if let Ok( first ) = std::env::var( format!( "{upper}_API_KEY" ) )
        {
          if !first.is_empty()
          {
            keys.push( SecretString::from( first ) );
          }
        }

        let mut index = 2;
        loop
        {
          match std::env::var( format!( "{upper}_API_KEY_{index}" ) )
          {
            Ok( value ) if !value.is_empty() =>
            {
              keys.push( SecretString::from( value ) );
              index += 1;
            }
            _ => break,
          }
        }

        if !keys.is_empty()
        {
          by_provider.insert( provider.to_string(), ProviderKeys { keys, cursor : AtomicUsize::new( 0 ) } );
        }
      }
      Self { by_provider }
    }

    /// Build a store directly from an explicit map, bypassing the
    /// environment scan entirely. Intended for tests.
    #[ inline ]
    #[ must_use ]
    pub fn from_keys( keys : HashMap< String, Vec< String > > ) -> Self
    {
      let by_provider = keys.into_iter()
        .filter( | ( _, v ) | !v.is_empty() )
        .map( | ( provider, values ) |
        (
          provider,
          ProviderKeys
          {
            keys : values.into_iter().map( SecretString::from ).collect(),
            cursor : AtomicUsize::new( 0 ),
          },
        ) )
        .collect();
      Self { by_provider }
    }
  }

  impl CredentialStore for EnvCredentialStore
  {
    #[ inline ]
    fn next_key( &self, provider : &str ) -> Result< SecretString, Error >
    {
      let entry = self.by_provider.get( provider )
        .ok_or_else( || Error::Authentication( format!( "no API key configured for provider '{provider}'" ) ) )?;
      let index = entry.cursor.fetch_add( 1, Ordering::Relaxed ) % entry.keys.len();
      Ok( entry.keys[ index ].expose_secret().into() )
    }

    #[ inline ]
    fn key_count( &self, provider : &str ) -> usize
    {
      self.by_provider.get( provider ).map_or( 0, | e | e.keys.len() )
    }
  }

  #[ cfg( test ) ]
  mod tests
  {
    use super::*;

    #[ test ]
    fn missing_provider_is_an_authentication_error()
    {
      let store = EnvCredentialStore::from_keys( HashMap::new() );
      assert!( store.next_key( "openai" ).is_err() );
    }

    #[ test ]
    fn rotates_round_robin_across_registered_keys()
    {
      let mut keys = HashMap::new();
      keys.insert( "openai".to_string(), vec![ "k1".to_string(), "k2".to_string() ] );
      let store = EnvCredentialStore::from_keys( keys );

      let first = store.next_key( "openai" ).expect( "key should exist" );
      let second = store.next_key( "openai" ).expect( "key should exist" );
      let third = store.next_key( "openai" ).expect( "key should exist" );

      assert_eq!( first.expose_secret(), "k1" );
      assert_eq!( second.expose_secret(), "k2" );
      assert_eq!( third.expose_secret(), "k1" );
    }

    #[ test ]
    fn key_count_reflects_registered_keys()
    {
      let mut keys = HashMap::new();
      keys.insert( "openai".to_string(), vec![ "k1".to_string() ] );
      let store = EnvCredentialStore::from_keys( keys );
      assert_eq!( store.key_count( "openai" ), 1 );
      assert_eq!( store.key_count( "anthropic" ), 0 );
    }
  }
}

pub use private::{ CredentialStore, EnvCredentialStore };
