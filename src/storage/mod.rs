//! Append-only persistence for telemetry records (spec §6 "Persistence").
//!
//! Every table is a plain JSONL file : one `serde_json`-encoded record per
//! line, appended with `O_APPEND` semantics. Compiled in only behind the
//! `persistence` feature ; without it every tracker keeps state purely
//! in-memory.

#![ cfg( feature = "persistence" ) ]

mod private
{
  use std::path::{ Path, PathBuf };
  use serde::Serialize;
  use tokio::fs::OpenOptions;
  use tokio::io::AsyncWriteExt;

  use crate::error::Error;

  /// An append-only JSONL-backed table for one record type.
  #[ derive( Debug, Clone ) ]
  pub struct JsonlTable
  {
    path : PathBuf,
  }

  impl JsonlTable
  {
    /// Open (without creating) a table rooted at `path`. The file is
    /// created lazily on first [`JsonlTable::append`].
    #[ inline ]
    #[ must_use ]
    pub fn new( path : impl AsRef< Path > ) -> Self
    {
      Self { path : path.as_ref().to_path_buf() }
    }

    /// Serialize `record` and append it as one line, creating the file
    /// and any missing parent directories on first use.
    #[ inline ]
    pub async fn append< T : Serialize + Sync >( &self, record : &T ) -> Result< (), Error >
    {
      if let Some( parent ) = self.path.parent()
      {
        tokio::fs::create_dir_all( parent ).await?;
      }
      let mut line = serde_json::to_string( record )?;
      line.push( '\n' );

      let mut file = OpenOptions::new()
        .create( true )
        .append( true )
        .open( &self.path )
        .await?;
      file.write_all( line.as_bytes() ).await?;
      file.flush().await?;
      Ok( () )
    }

    /// Read back every record in the table, in append order. Missing
    /// lines that fail to deserialize are skipped rather than failing the
    /// whole read, mirroring the registry's per-entry tolerance.
    #[ inline ]
    pub async fn read_all< T : serde::de::DeserializeOwned >( &self ) -> Result< Vec< T >, Error >
    {
      let Ok( contents ) = tokio::fs::read_to_string( &self.path ).await else { return Ok( Vec::new() ) };
      Ok
      (
        contents.lines()
          .filter( | line | !line.trim().is_empty() )
          .filter_map( | line | serde_json::from_str( line ).ok() )
          .collect()
      )
    }
  }

  /// The five append-only tables named by spec §6 "Persistence", rooted
  /// under a single base directory.
  #[ derive( Debug, Clone ) ]
  pub struct TelemetryStore
  {
    /// `health_checks` table.
    pub health_checks : JsonlTable,
    /// `rate_limit_events` table.
    pub rate_limit_events : JsonlTable,
    /// `performance_records` table.
    pub performance_records : JsonlTable,
    /// `cost_records` table.
    pub cost_records : JsonlTable,
    /// `failover_events` table.
    pub failover_events : JsonlTable,
  }

  impl TelemetryStore
  {
    /// Build a store with every table rooted under `base_dir`.
    #[ inline ]
    #[ must_use ]
    pub fn rooted_at( base_dir : impl AsRef< Path > ) -> Self
    {
      let base = base_dir.as_ref();
      Self
      {
        health_checks : JsonlTable::new( base.join( "health_checks.jsonl" ) ),
        rate_limit_events : JsonlTable::new( base.join( "rate_limit_events.jsonl" ) ),
        performance_records : JsonlTable::new( base.join( "performance_records.jsonl" ) ),
        cost_records : JsonlTable::new( base.join( "cost_records.jsonl" ) ),
        failover_events : JsonlTable::new( base.join( "failover_events.jsonl" ) ),
      }
    }
  }

  #[ cfg( test ) ]
  mod tests
  {
    use super::*;
    use serde::{ Deserialize, Serialize };

    #[ derive( Debug, Serialize, Deserialize, PartialEq ) ]
    struct Sample
    {
      value : u32,
    }

    #[ tokio::test ]
    async fn append_then_read_round_trips()
    {
      let dir = std::env::temp_dir().join( format!( "api_model_plane_test_{:?}", std::thread::current().id() ) );
      let table = JsonlTable::new( dir.join( "sample.jsonl" ) );

      table.append( &Sample { value : 1 } ).await.expect( "append should succeed" );
      table.append( &Sample { value : 2 } ).await.expect( "append should succeed" );

      let read_back : Vec< Sample > = table.read_all().await.expect( "read should succeed" );
      assert_eq!( read_back, vec![ Sample { value : 1 }, Sample { value : 2 } ] );

      let _ = tokio::fs::remove_dir_all( dir ).await;
    }

    #[ tokio::test ]
    async fn read_all_of_missing_file_is_empty()
    {
      let table = JsonlTable::new( std::env::temp_dir().join( "api_model_plane_does_not_exist.jsonl" ) );
      let read_back : Vec< Sample > = table.read_all().await.expect( "missing file reads as empty" );
      assert!( read_back.is_empty() );
    }
  }
}

pub use private::{ JsonlTable, TelemetryStore };
