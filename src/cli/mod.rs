pub mod db_counts;
